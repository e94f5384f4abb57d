//! Bound identity persistence for the broker.
//!
//! This crate provides:
//! - `IdentityStore`: the single writer of the bound remote identity, with
//!   atomic on-disk replacement and an in-memory snapshot for readers
//! - `BindGate`: trust-list gated binding on top of the store

mod bind_gate;
mod error;
mod identity;
mod store;

pub use bind_gate::{BindGate, BindResult, TrustList};
pub use error::{StorageError, StorageResult};
pub use identity::{BoundIdentity, ChatId};
pub use store::IdentityStore;
