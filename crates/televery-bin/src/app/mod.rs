//! Application wiring and lifecycle management.

mod bind_dispatcher;
mod command_pump;
mod error;
mod init;
mod lifecycle;

pub use error::{AppError, AppResult};
pub use init::run_broker;
pub use lifecycle::{check_status, request_code, stop_broker};
