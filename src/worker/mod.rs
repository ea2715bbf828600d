//! The two client roles driven over the shared connection lifecycle

pub mod consumer;
pub mod producer;

pub use consumer::{ConsumerWorker, LogSink, MessageSink, ReceivedMessage, Subscription};
pub use producer::{
    ProducerPhase, ProducerWorker, RandomTemperature, ReadingSource, TickOutcome,
    DEFAULT_PUBLISH_INTERVAL,
};
