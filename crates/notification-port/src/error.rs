//! Transport error types.

use thiserror::Error;

/// Errors from the remote messaging transport.
#[derive(Error, Debug)]
pub enum TransportError {
    /// HTTP request error. The request URL is stripped since it embeds the bot token.
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    /// The platform answered but refused the call
    #[error("API error {code:?}: {description}")]
    Api {
        code: Option<i64>,
        description: String,
    },

    /// Response body did not match the expected shape
    #[error("Decode error: {0}")]
    Decode(String),

    /// Delivery did not finish in time
    #[error("Operation timed out")]
    Timeout,
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return TransportError::Timeout;
        }
        TransportError::Http(err.without_url())
    }
}

impl TransportError {
    /// Returns true if retrying later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Timeout => true,
            TransportError::Http(e) => {
                if e.is_connect() || e.is_timeout() || e.is_request() {
                    return true;
                }
                e.status().is_some_and(|status| status.is_server_error())
            }
            TransportError::Api { code, .. } => {
                matches!(code, Some(429) | Some(500..=599))
            }
            TransportError::Decode(_) => false,
        }
    }
}

/// Result type alias using TransportError.
pub type TransportResult<T> = Result<T, TransportError>;
