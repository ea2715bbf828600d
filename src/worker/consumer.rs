//! Passive temperature subscriber
//!
//! The session is clean, so the broker forgets subscriptions on every
//! reconnect. [`ConsumerWorker`] re-subscribes each time the lifecycle
//! manager reports a transition into `Connected`.

use crate::lifecycle::{ConnectionManager, SessionHandler};
use crate::observability::metrics::metrics;
use crate::payload::{decode_text, parse_reading, PayloadError};
use crate::transport::QoS;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn, Instrument};

/// Topic filter plus requested QoS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic: String,
    pub qos: QoS,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, qos: QoS) -> Self {
        Self {
            topic: topic.into(),
            qos,
        }
    }
}

/// A decoded arrival
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub topic: String,
    pub text: String,
    /// Present when the text is a temperature reading
    pub reading: Option<f64>,
}

/// Downstream receiver of decoded messages
///
/// Called on the broker client's delivery context; must not block.
pub trait MessageSink: Send + Sync {
    fn deliver(&self, message: ReceivedMessage);
}

/// Sink that writes every arrival to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl MessageSink for LogSink {
    fn deliver(&self, message: ReceivedMessage) {
        match message.reading {
            Some(temp) => info!(
                topic = %message.topic,
                temp,
                "Received temperature on topic {}: {}",
                message.topic,
                message.text
            ),
            None => info!("Received message on topic {}: {}", message.topic, message.text),
        }
    }
}

/// Keeps the subscription alive and surfaces arrivals to a sink
pub struct ConsumerWorker {
    subscription: Subscription,
    sink: Arc<dyn MessageSink>,
}

impl ConsumerWorker {
    pub fn new(subscription: Subscription, sink: Arc<dyn MessageSink>) -> Self {
        Self { subscription, sink }
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Issue the subscribe call; failure counts as a connection failure
    pub async fn subscribe(&self, manager: &Arc<ConnectionManager>) {
        let Subscription { topic, qos } = &self.subscription;
        match manager.subscribe(topic, *qos).await {
            Ok(()) => {
                metrics().record_subscription();
                info!("Subscribed to topic {}", topic);
            }
            Err(e) => {
                error!("Failed to subscribe to topic {}: {}", topic, e);
                manager.connection_failed(&e);
            }
        }
    }

    /// Decode an arrival and hand it to the sink
    pub fn process_message(&self, topic: &str, payload: &[u8]) -> Result<(), PayloadError> {
        metrics().record_message_received();
        let text = decode_text(payload)?;
        let reading = parse_reading(text).map(|reading| reading.temp);
        self.sink.deliver(ReceivedMessage {
            topic: topic.to_string(),
            text: text.to_string(),
            reading,
        });
        Ok(())
    }
}

#[async_trait]
impl SessionHandler for ConsumerWorker {
    async fn on_connected(&self, manager: &Arc<ConnectionManager>) {
        let span = crate::worker_span!(role = "consumer", topic = %self.subscription.topic);
        self.subscribe(manager).instrument(span).await;
    }

    fn on_message(&self, topic: &str, payload: &[u8]) {
        if let Err(e) = self.process_message(topic, payload) {
            metrics().record_decode_failure();
            warn!("Failed to process message on topic {}: {}", topic, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CollectingSink;

    fn worker(sink: &Arc<CollectingSink>) -> ConsumerWorker {
        ConsumerWorker::new(
            Subscription::new("sensor/temperature", QoS::AtLeastOnce),
            sink.clone(),
        )
    }

    #[test]
    fn test_reading_is_surfaced() {
        let sink = Arc::new(CollectingSink::new());
        let consumer = worker(&sink);

        consumer
            .process_message("sensor/temperature", br#"{"temp":21.5}"#)
            .unwrap();

        let messages = sink.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].topic, "sensor/temperature");
        assert_eq!(messages[0].reading, Some(21.5));
    }

    #[test]
    fn test_plain_text_is_surfaced_without_reading() {
        let sink = Arc::new(CollectingSink::new());
        let consumer = worker(&sink);

        consumer.process_message("sensor/temperature", b"hello").unwrap();

        let messages = sink.messages();
        assert_eq!(messages[0].text, "hello");
        assert_eq!(messages[0].reading, None);
    }

    #[test]
    fn test_invalid_utf8_is_contained() {
        let sink = Arc::new(CollectingSink::new());
        let consumer = worker(&sink);

        assert!(consumer
            .process_message("sensor/temperature", &[0xc3, 0x28])
            .is_err());
        consumer.on_message("sensor/temperature", &[0xc3, 0x28]);
        assert!(sink.messages().is_empty());
    }

    #[test]
    fn test_log_sink_accepts_both_shapes() {
        LogSink.deliver(ReceivedMessage {
            topic: "sensor/temperature".to_string(),
            text: r#"{"temp":21.5}"#.to_string(),
            reading: Some(21.5),
        });
        LogSink.deliver(ReceivedMessage {
            topic: "sensor/temperature".to_string(),
            text: "raw".to_string(),
            reading: None,
        });
    }
}
