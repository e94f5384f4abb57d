//! Broker error types.

use std::path::PathBuf;
use thiserror::Error;

/// Broker error type.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The listener endpoint could not be bound
    #[error("Failed to bind {}: {source}", path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Something other than a socket occupies the endpoint path
    #[error("Endpoint path {} exists and is not a socket", .0.display())]
    NotASocket(PathBuf),

    /// Another broker is already accepting on the endpoint
    #[error("Another broker is already listening on {}", .0.display())]
    AlreadyRunning(PathBuf),

    /// PID file for the endpoint could not be written
    #[error("PID file error: {0}")]
    Lifecycle(#[from] televery_lifecycle::LifecycleError),

    /// Code range with lo above hi
    #[error("Invalid code range: {lo} > {hi}")]
    InvalidRange { lo: u32, hi: u32 },

    /// The broker has nobody to deliver codes to
    #[error("No bound identity")]
    NoBoundIdentity,

    /// Connection closed without a reply
    #[error("Connection closed")]
    ConnectionClosed,

    /// Reply did not look like a code or a known failure
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Local IO did not finish in time
    #[error("Operation timed out")]
    Timeout,
}

impl BrokerError {
    /// Errors that stop the broker from taking its endpoint.
    pub fn is_endpoint_failure(&self) -> bool {
        matches!(
            self,
            BrokerError::Bind { .. }
                | BrokerError::NotASocket(_)
                | BrokerError::AlreadyRunning(_)
                | BrokerError::Lifecycle(_)
        )
    }
}

/// Result type alias using BrokerError.
pub type BrokerResult<T> = Result<T, BrokerError>;
