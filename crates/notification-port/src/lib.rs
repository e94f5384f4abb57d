//! Remote notification channel for the broker.
//!
//! This crate provides:
//! - `NotificationPort`: what the broker needs from a messaging platform
//!   (send text to a chat, receive `/start` bind commands)
//! - `TelegramTransport`: Bot API implementation over HTTPS long polling

mod error;
mod port;
mod telegram;

pub use error::{TransportError, TransportResult};
pub use port::{parse_bind_command, BindCommand, NotificationPort};
pub use telegram::{TelegramConfig, TelegramTransport};
