//! Connection lifecycle shared by the producer and consumer roles
//!
//! - [`state`] - the three-state [`ConnectionState`] and its atomic cell
//! - [`scheduler`] - the single-slot [`ReconnectScheduler`]
//! - [`manager`] - the [`ConnectionManager`] that ties them to a broker client

use thiserror::Error;

pub mod manager;
pub mod scheduler;
pub mod state;

pub use manager::{ConnectOutcome, ConnectionManager, SessionHandler, DEFAULT_RECONNECT_INTERVAL};
pub use scheduler::{ReconnectScheduler, ReconnectTask, ScheduleOutcome};
pub use state::{AtomicConnectionState, ConnectionState};

/// Misuse of the lifecycle API
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Connection manager already initialized")]
    AlreadyInitialized,
}
