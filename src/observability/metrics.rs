//! Process-wide operational counters
//!
//! Both roles record into one global collector. Counters are relaxed atomics;
//! they are read only for reporting.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

pub struct MetricsCollector {
    connected: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    connections_lost: AtomicU64,
    reconnects_scheduled: AtomicU64,
    last_connected_at: AtomicU64,

    messages_published: AtomicU64,
    publish_failures: AtomicU64,
    publishes_skipped: AtomicU64,

    messages_received: AtomicU64,
    decode_failures: AtomicU64,
    subscriptions: AtomicU64,

    started_at: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            connections_lost: AtomicU64::new(0),
            reconnects_scheduled: AtomicU64::new(0),
            last_connected_at: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            publishes_skipped: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            subscriptions: AtomicU64::new(0),
            started_at: AtomicU64::new(current_timestamp()),
        }
    }

    // Connection lifecycle
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub fn record_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.last_connected_at
            .store(current_timestamp(), Ordering::Relaxed);
        self.set_connected(true);
    }

    pub fn record_connection_failure(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.set_connected(false);
    }

    pub fn record_connection_lost(&self) {
        self.connections_lost.fetch_add(1, Ordering::Relaxed);
        self.set_connected(false);
    }

    pub fn record_reconnect_scheduled(&self) {
        self.reconnects_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    // Producer
    pub fn record_message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_skipped(&self) {
        self.publishes_skipped.fetch_add(1, Ordering::Relaxed);
    }

    // Consumer
    pub fn record_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_subscription(&self) {
        self.subscriptions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let last_connected = load(&self.last_connected_at);

        MetricsSnapshot {
            timestamp: now,
            uptime_seconds: now.saturating_sub(load(&self.started_at)),
            connection: ConnectionMetrics {
                connected: self.is_connected(),
                attempts: load(&self.connection_attempts),
                established: load(&self.connections_established),
                failures: load(&self.connection_failures),
                lost: load(&self.connections_lost),
                reconnects_scheduled: load(&self.reconnects_scheduled),
                last_connected_at: (last_connected > 0).then_some(last_connected),
            },
            producer: ProducerMetrics {
                messages_published: load(&self.messages_published),
                publish_failures: load(&self.publish_failures),
                publishes_skipped: load(&self.publishes_skipped),
            },
            consumer: ConsumerMetrics {
                messages_received: load(&self.messages_received),
                decode_failures: load(&self.decode_failures),
                subscriptions: load(&self.subscriptions),
            },
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of every counter
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: u64,
    pub uptime_seconds: u64,
    pub connection: ConnectionMetrics,
    pub producer: ProducerMetrics,
    pub consumer: ConsumerMetrics,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionMetrics {
    pub connected: bool,
    pub attempts: u64,
    pub established: u64,
    pub failures: u64,
    pub lost: u64,
    pub reconnects_scheduled: u64,
    pub last_connected_at: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProducerMetrics {
    pub messages_published: u64,
    pub publish_failures: u64,
    pub publishes_skipped: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsumerMetrics {
    pub messages_received: u64,
    pub decode_failures: u64,
    pub subscriptions: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_counters() {
        let collector = MetricsCollector::new();
        collector.record_connection_attempt();
        collector.record_connection_failure();
        collector.record_reconnect_scheduled();
        collector.record_connection_attempt();
        collector.record_connection_established();

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.connection.attempts, 2);
        assert_eq!(snapshot.connection.failures, 1);
        assert_eq!(snapshot.connection.established, 1);
        assert_eq!(snapshot.connection.reconnects_scheduled, 1);
        assert!(snapshot.connection.connected);
        assert!(snapshot.connection.last_connected_at.is_some());
    }

    #[test]
    fn test_loss_clears_connected_flag() {
        let collector = MetricsCollector::new();
        collector.record_connection_established();
        collector.record_connection_lost();

        assert!(!collector.is_connected());
        assert_eq!(collector.snapshot().connection.lost, 1);
    }

    #[test]
    fn test_worker_counters() {
        let collector = MetricsCollector::new();
        collector.record_message_published();
        collector.record_publish_skipped();
        collector.record_publish_skipped();
        collector.record_publish_failure();
        collector.record_subscription();
        collector.record_message_received();
        collector.record_decode_failure();

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.producer.messages_published, 1);
        assert_eq!(snapshot.producer.publishes_skipped, 2);
        assert_eq!(snapshot.producer.publish_failures, 1);
        assert_eq!(snapshot.consumer.subscriptions, 1);
        assert_eq!(snapshot.consumer.messages_received, 1);
        assert_eq!(snapshot.consumer.decode_failures, 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_value(MetricsCollector::new().snapshot()).unwrap();
        assert_eq!(json["connection"]["connected"], false);
        assert!(json["connection"]["last_connected_at"].is_null());
        assert_eq!(json["producer"]["messages_published"], 0);
    }
}
