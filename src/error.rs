//! Crate-level error type
//!
//! Only the binary's startup path returns these. Once the roles are running,
//! connectivity and payload failures are handled where they occur and never
//! surface here.

use crate::config::ConfigError;
use crate::lifecycle::LifecycleError;
use crate::payload::PayloadError;
use crate::transport::BrokerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Payload error: {0}")]
    Payload(#[from] PayloadError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
