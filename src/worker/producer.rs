//! Periodic temperature publisher
//!
//! Each tick generates a reading, rounds it, and publishes it retained at
//! QoS 1 if the session is usable. A tick that finds the session down makes
//! no broker call at all: it asks the lifecycle manager for recovery and
//! returns.

use crate::lifecycle::ConnectionManager;
use crate::observability::metrics::metrics;
use crate::payload::{encode_reading, TemperatureReading};
use crate::transport::QoS;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn, Instrument};

/// Default cadence of producer ticks
pub const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_millis(5000);

/// Source of raw readings
pub trait ReadingSource: Send + Sync {
    fn next_reading(&self) -> f64;
}

/// Uniformly random readings in `[min, max)`
#[derive(Debug, Clone)]
pub struct RandomTemperature {
    min: f64,
    max: f64,
}

impl RandomTemperature {
    /// `min` must be strictly below `max`; config validation guarantees it
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

impl Default for RandomTemperature {
    fn default() -> Self {
        Self::new(15.0, 30.0)
    }
}

impl ReadingSource for RandomTemperature {
    fn next_reading(&self) -> f64 {
        if self.min < self.max {
            rand::thread_rng().gen_range(self.min..self.max)
        } else {
            self.min
        }
    }
}

/// Where a tick currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerPhase {
    Idle,
    Generating,
    Publishing,
}

impl ProducerPhase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ProducerPhase::Generating,
            2 => ProducerPhase::Publishing,
            _ => ProducerPhase::Idle,
        }
    }
}

/// How a tick ended
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    Published(f64),
    SkippedDisconnected,
    EncodeFailed,
    PublishFailed,
}

/// Publishes one reading per tick through the lifecycle manager
pub struct ProducerWorker {
    manager: Arc<ConnectionManager>,
    source: Box<dyn ReadingSource>,
    topic: String,
    qos: QoS,
    retain: bool,
    phase: AtomicU8,
    outage_reported: AtomicBool,
}

impl ProducerWorker {
    pub fn new(
        manager: Arc<ConnectionManager>,
        source: Box<dyn ReadingSource>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            manager,
            source,
            topic: topic.into(),
            qos: QoS::AtLeastOnce,
            retain: true,
            phase: AtomicU8::new(0),
            outage_reported: AtomicBool::new(false),
        }
    }

    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn phase(&self) -> ProducerPhase {
        ProducerPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn enter(&self, phase: ProducerPhase) {
        let raw = match phase {
            ProducerPhase::Idle => 0,
            ProducerPhase::Generating => 1,
            ProducerPhase::Publishing => 2,
        };
        self.phase.store(raw, Ordering::Release);
    }

    /// Run one generate-and-publish cycle
    pub async fn on_tick(&self) -> TickOutcome {
        let outcome = self.tick().await;
        self.enter(ProducerPhase::Idle);
        outcome
    }

    async fn tick(&self) -> TickOutcome {
        self.enter(ProducerPhase::Generating);
        let reading = TemperatureReading::rounded(self.source.next_reading());
        let payload = match encode_reading(&reading) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize temperature data: {}", e);
                return TickOutcome::EncodeFailed;
            }
        };
        debug!("Generated temperature: {}°C", reading.temp);

        if !self.manager.is_connected() {
            metrics().record_publish_skipped();
            if !self.outage_reported.swap(true, Ordering::AcqRel) {
                warn!("Publisher not connected. Scheduling reconnect...");
            } else {
                debug!("Publisher still not connected, skipping tick");
            }
            self.manager.schedule_reconnect();
            return TickOutcome::SkippedDisconnected;
        }

        self.enter(ProducerPhase::Publishing);
        match self
            .manager
            .publish(&self.topic, payload, self.qos, self.retain)
            .await
        {
            Ok(()) => {
                metrics().record_message_published();
                self.outage_reported.store(false, Ordering::Release);
                info!("Published temperature: {}°C", reading.temp);
                TickOutcome::Published(reading.temp)
            }
            Err(e) => {
                metrics().record_publish_failure();
                error!("Failed to publish temperature data: {}", e);
                if e.is_connectivity() {
                    self.manager.connection_failed(&e);
                }
                TickOutcome::PublishFailed
            }
        }
    }

    /// Tick on a fixed cadence until `shutdown` flips to true
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            topic = %self.topic,
            interval_ms = interval.as_millis() as u64,
            "Producer started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let span = crate::worker_span!(role = "producer", topic = %self.topic);
                    self.on_tick().instrument(span).await;
                }
            }
        }
        info!("Producer stopped");
    }
}
