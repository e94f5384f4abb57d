//! Broker-facing transport interface.

use crate::TransportResult;
use async_trait::async_trait;
use identity_store::ChatId;

/// A `/start` request from a remote user asking to bind their chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindCommand {
    /// Username of the requesting chat, if the platform exposes one.
    pub label: Option<String>,
    pub identity: ChatId,
}

/// What the broker needs from a remote messaging platform.
///
/// Implementations own authentication against the platform and any
/// retry behavior inside a single call.
#[async_trait]
pub trait NotificationPort: Send + Sync {
    /// Deliver `text` to the chat `identity`. Best effort.
    async fn send(&self, identity: ChatId, text: &str) -> TransportResult<()>;

    /// Wait for the next batch of inbound bind commands.
    ///
    /// Each command is returned at most once across calls. An empty batch
    /// means the poll window elapsed with nothing to report.
    async fn poll_commands(&self) -> TransportResult<Vec<BindCommand>>;
}

/// Recognize `/start`, `/start@botname` and `/start <payload>`.
pub fn parse_bind_command(text: &str) -> bool {
    let Some(head) = text.split_whitespace().next() else {
        return false;
    };
    let command = head.split('@').next().unwrap_or(head);
    command == "/start"
}
