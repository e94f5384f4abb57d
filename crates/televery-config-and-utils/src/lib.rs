//! Core types, configuration, and utilities for the Televery broker.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, DEFAULT_CODE_RANGE, DEFAULT_LOG_LEVEL, DEFAULT_POLL_TIMEOUT_SECS,
    DEFAULT_SEND_TIMEOUT_MS, DEFAULT_TELEGRAM_API_URL,
};
pub use error::{CoreError, CoreResult};
pub use logging::init_logging;
pub use paths::Paths;
