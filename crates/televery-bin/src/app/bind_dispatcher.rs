//! Bind command dispatch.
//!
//! Runs each inbound `/start` through the bind gate and tells the remote
//! user how it went.

use identity_store::{BindGate, BindResult, ChatId, StorageError};
use notification_port::{BindCommand, NotificationPort};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Reply text for a bind attempt from `identity`.
pub fn bind_reply(result: &BindResult, identity: ChatId) -> String {
    match result {
        BindResult::Accepted(_) => format!("OK! Chat ID {} has been saved.", identity),
        BindResult::Rejected => "Not OK!".to_string(),
        BindResult::StorageFailed(_) => {
            format!("Could not save chat ID {}, please try again.", identity)
        }
    }
}

/// Spawn the dispatcher. It runs until the command pump drops its sender.
pub fn spawn_bind_dispatcher(
    gate: Arc<BindGate>,
    port: Arc<dyn NotificationPort>,
    send_timeout: Duration,
    mut commands: mpsc::Receiver<BindCommand>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(command) = commands.recv().await {
            dispatch_bind(&gate, port.as_ref(), send_timeout, command).await;
        }
        debug!("Bind dispatcher task stopped");
    })
}

/// Handle one bind command and send the reply. Reply delivery is best effort.
///
/// The gate persists with blocking file IO, so it runs on the blocking pool.
pub async fn dispatch_bind(
    gate: &Arc<BindGate>,
    port: &dyn NotificationPort,
    send_timeout: Duration,
    command: BindCommand,
) -> BindResult {
    let identity = command.identity;
    let bind_gate = gate.clone();
    let label = command.label.clone();
    let result = match tokio::task::spawn_blocking(move || {
        bind_gate.handle_bind(label.as_deref(), identity)
    })
    .await
    {
        Ok(result) => result,
        Err(e) => {
            warn!(chat_id = %identity, error = %e, "Bind task failed");
            BindResult::StorageFailed(StorageError::Io(std::io::Error::other(e.to_string())))
        }
    };
    info!(
        chat_id = %identity,
        label = command.label.as_deref().unwrap_or("-"),
        accepted = result.is_accepted(),
        "Bind command handled"
    );

    let reply = bind_reply(&result, identity);
    match tokio::time::timeout(send_timeout, port.send(identity, &reply)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(chat_id = %identity, error = %e, "Failed to send bind reply"),
        Err(_) => warn!(chat_id = %identity, "Bind reply timed out"),
    }

    result
}
