//! Local verification request endpoint.
//!
//! This crate provides:
//! - Unix domain socket server where connecting is the request
//! - One-time code generation from the OS CSPRNG
//! - A small client for local callers

mod client;
mod code;
mod error;
mod server;

pub use client::VerificationClient;
pub use code::{next_code, CodeRange, VerificationCode};
pub use error::{BrokerError, BrokerResult};
pub use server::{delivery_text, ConnectionOutcome, VerificationServer, FAILURE_REPLY, IO_TIMEOUT};
