//! Trust-list gated binding.

use crate::{BoundIdentity, ChatId, IdentityStore, StorageError};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Usernames allowed to bind a chat. Fixed for the life of the process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustList {
    labels: BTreeSet<String>,
}

impl TrustList {
    pub fn contains(&self, label: &str) -> bool {
        self.labels.contains(normalize_label(label))
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }
}

impl<S: AsRef<str>> FromIterator<S> for TrustList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let labels = iter
            .into_iter()
            .map(|label| normalize_label(label.as_ref()).to_string())
            .filter(|label| !label.is_empty())
            .collect();
        Self { labels }
    }
}

/// Usernames are configured and compared without the leading `@`.
fn normalize_label(label: &str) -> &str {
    let trimmed = label.trim();
    trimmed.strip_prefix('@').unwrap_or(trimmed)
}

/// Outcome of a bind attempt.
#[derive(Debug)]
pub enum BindResult {
    /// The identity is now the delivery target.
    Accepted(BoundIdentity),
    /// Label missing or not trusted. Nothing changed.
    Rejected,
    /// Label trusted but the identity could not be persisted. Nothing changed.
    StorageFailed(StorageError),
}

impl BindResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, BindResult::Accepted(_))
    }
}

/// Authorizes bind requests and records accepted ones in the store.
pub struct BindGate {
    trust_list: TrustList,
    store: Arc<IdentityStore>,
}

impl BindGate {
    pub fn new(trust_list: TrustList, store: Arc<IdentityStore>) -> Self {
        if trust_list.is_empty() {
            warn!("Trust list is empty, every bind request will be rejected");
        }
        Self { trust_list, store }
    }

    pub fn trust_list(&self) -> &TrustList {
        &self.trust_list
    }

    pub fn handle_bind(&self, label: Option<&str>, identity: ChatId) -> BindResult {
        let label = match label {
            Some(label) if self.trust_list.contains(label) => normalize_label(label),
            _ => {
                warn!(
                    label = label.unwrap_or("<none>"),
                    chat_id = %identity,
                    "Rejected bind from untrusted user"
                );
                return BindResult::Rejected;
            }
        };

        let bound = BoundIdentity::new(identity, label);
        match self.store.save(bound.clone()) {
            Ok(()) => {
                info!(label = %label, chat_id = %identity, "Bound identity");
                BindResult::Accepted(bound)
            }
            Err(err) => {
                warn!(
                    label = %label,
                    chat_id = %identity,
                    error = %err,
                    "Trusted bind could not be persisted"
                );
                BindResult::StorageFailed(err)
            }
        }
    }
}
