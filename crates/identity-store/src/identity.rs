use std::fmt;
use std::str::FromStr;

/// Platform-assigned numeric handle of a remote chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChatId(pub i64);

impl ChatId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ChatId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(ChatId)
    }
}

impl From<i64> for ChatId {
    fn from(value: i64) -> Self {
        ChatId(value)
    }
}

/// The single remote identity allowed to receive verification codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundIdentity {
    pub chat_id: ChatId,
    /// Username that authorized the bind. Not persisted, so `None` after a restart.
    pub label: Option<String>,
}

impl BoundIdentity {
    pub fn new(chat_id: ChatId, label: impl Into<String>) -> Self {
        Self {
            chat_id,
            label: Some(label.into()),
        }
    }

    /// Identity restored from disk, where only the chat id survives.
    pub fn restored(chat_id: ChatId) -> Self {
        Self {
            chat_id,
            label: None,
        }
    }
}
