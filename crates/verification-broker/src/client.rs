//! Client for local callers.

use crate::server::FAILURE_REPLY;
use crate::{BrokerError, BrokerResult};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::UnixStream;

/// Long enough to cover a remote delivery timeout plus the local write.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connects to a running broker and reads back one code.
pub struct VerificationClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl VerificationClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Request a code. Returns the zero-padded digits.
    pub async fn request_code(&self) -> BrokerResult<String> {
        let mut stream = UnixStream::connect(&self.socket_path).await?;

        let mut reply = String::new();
        tokio::time::timeout(self.timeout, stream.read_to_string(&mut reply))
            .await
            .map_err(|_| BrokerError::Timeout)??;

        parse_reply(&reply)
    }
}

fn parse_reply(reply: &str) -> BrokerResult<String> {
    let reply = reply.trim_end();
    if reply.is_empty() {
        return Err(BrokerError::ConnectionClosed);
    }
    if reply == FAILURE_REPLY {
        return Err(BrokerError::NoBoundIdentity);
    }
    if reply.chars().all(|c| c.is_ascii_digit()) {
        return Ok(reply.to_string());
    }
    Err(BrokerError::Protocol(format!("unexpected reply: {:?}", reply)))
}
