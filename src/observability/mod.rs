//! Logging, metrics and health endpoints

pub mod health;
pub mod logging;
pub mod metrics;

pub use health::HealthServer;
pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{metrics, MetricsCollector, MetricsSnapshot};

pub use logging::{connection_span, worker_span};
