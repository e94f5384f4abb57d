//! Application error type and exit status mapping.

use televery_config_and_utils::CoreError;
use televery_lifecycle::LifecycleError;
use thiserror::Error;
use verification_broker::BrokerError;

/// Exit status for configuration errors.
pub const EXIT_CONFIG: u8 = 2;
/// Exit status when the local endpoint cannot be taken.
pub const EXIT_ENDPOINT: u8 = 3;
/// Exit status for any other failure.
pub const EXIT_FAILURE: u8 = 1;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] CoreError),

    #[error("{0}")]
    Broker(#[from] BrokerError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Broker task failed: {0}")]
    Task(String),
}

impl AppError {
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Config(_) => EXIT_CONFIG,
            AppError::Broker(e) if e.is_endpoint_failure() => EXIT_ENDPOINT,
            _ => EXIT_FAILURE,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
