//! Verification request server.
//!
//! Connecting to the socket is the request. For each connection the server
//! issues a fresh code, hands it to the notification port for the bound
//! identity, writes the digits back to the caller and closes:
//!
//! `Accepted -> CodeIssued -> Delivered -> Closed`
//!
//! With no bound identity the caller gets [`FAILURE_REPLY`] instead. A
//! failed or slow remote delivery never withholds the local reply. A caller
//! that has already hung up gets no code issued on its behalf.

use crate::code::{next_code, CodeRange, VerificationCode};
use crate::{BrokerError, BrokerResult};
use identity_store::IdentityStore;
use notification_port::NotificationPort;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use televery_lifecycle::{
    check_singleton, cleanup_pid_file, cleanup_socket_file, write_pid_file, SingletonCheck,
};
use tokio::io::{AsyncWriteExt, Interest};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Reply written when there is nobody to deliver to. Never confusable with digits.
pub const FAILURE_REPLY: &str = "ERR no bound identity";

/// Timeout for writing the local reply.
pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Text sent to the bound identity for `code`.
pub fn delivery_text(code: &VerificationCode) -> String {
    format!("New verification request, code is {}", code)
}

/// How a single connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// Code delivered remotely and returned locally.
    Delivered,
    /// Remote delivery failed or timed out; the caller still got the code.
    DeliveredLocallyOnly,
    /// Nothing is bound; the caller got the failure reply.
    NoBoundIdentity,
    /// The caller closed the connection before a code was issued.
    CallerGone,
}

/// Shared state every connection task needs.
struct ConnectionContext {
    store: Arc<IdentityStore>,
    port: Arc<dyn NotificationPort>,
    range: CodeRange,
    send_timeout: Duration,
}

/// Verification server listening on a Unix domain socket.
pub struct VerificationServer {
    socket_path: PathBuf,
    pid_path: PathBuf,
    context: Arc<ConnectionContext>,
    shutdown_tx: broadcast::Sender<()>,
}

impl VerificationServer {
    /// Create a new server. Nothing is bound until [`bind`](Self::bind).
    pub fn new(
        socket_path: impl Into<PathBuf>,
        store: Arc<IdentityStore>,
        port: Arc<dyn NotificationPort>,
        range: CodeRange,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let socket_path = socket_path.into();

        Self {
            pid_path: socket_path.with_extension("pid"),
            socket_path,
            context: Arc::new(ConnectionContext {
                store,
                port,
                range,
                send_timeout: DEFAULT_SEND_TIMEOUT,
            }),
            shutdown_tx,
        }
    }

    /// Bound on each remote delivery.
    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        if let Some(context) = Arc::get_mut(&mut self.context) {
            context.send_timeout = send_timeout;
        }
        self
    }

    /// PID file that marks this server as the socket's owner.
    /// Defaults to the socket path with a `.pid` extension.
    pub fn with_pid_file(mut self, pid_path: impl Into<PathBuf>) -> Self {
        self.pid_path = pid_path.into();
        self
    }

    /// Get a shutdown receiver.
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Trigger shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Take the endpoint and record this process in the PID file.
    ///
    /// A socket left by a crashed run is removed first. A socket whose
    /// owner is still alive, or a non-socket object at the path, is an
    /// error. The existing socket is never connected to.
    pub fn bind(&self) -> BrokerResult<UnixListener> {
        let socket_path = self.socket_path.as_path();

        match check_singleton(socket_path, &self.pid_path) {
            SingletonCheck::Available | SingletonCheck::StaleSocketCleaned => {}
            SingletonCheck::AlreadyRunning => {
                return Err(BrokerError::AlreadyRunning(socket_path.to_path_buf()));
            }
            SingletonCheck::Occupied => {
                return Err(BrokerError::NotASocket(socket_path.to_path_buf()));
            }
        }

        let bind_error = |source: std::io::Error| BrokerError::Bind {
            path: socket_path.to_path_buf(),
            source,
        };

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).map_err(bind_error)?;
        }

        let listener = UnixListener::bind(socket_path).map_err(bind_error)?;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))
            .map_err(bind_error)?;

        let pid = match write_pid_file(&self.pid_path) {
            Ok(pid) => pid,
            Err(e) => {
                drop(listener);
                let _ = cleanup_socket_file(socket_path);
                return Err(e.into());
            }
        };

        info!(path = %socket_path.display(), pid, "Verification server listening");
        Ok(listener)
    }

    /// Accept connections on `listener` until shutdown. The socket and PID
    /// files are removed on exit.
    pub async fn serve(&self, listener: UnixListener) -> BrokerResult<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, _)) => {
                            let context = self.context.clone();
                            let request_id = uuid::Uuid::new_v4().to_string();
                            let span = info_span!("verification_request", request_id = %request_id);
                            tokio::spawn(
                                async move {
                                    match handle_connection(stream, &context).await {
                                        Ok(outcome) => info!(?outcome, "Connection closed"),
                                        Err(e) => info!(error = %e, "Caller went away before the reply"),
                                    }
                                }
                                .instrument(span),
                            );
                        }
                        Err(e) => {
                            error!(error = %e, "Accept error");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Verification server shutting down");
                    break;
                }
            }
        }

        drop(listener);
        if let Err(e) = cleanup_socket_file(&self.socket_path) {
            warn!(error = %e, "Failed to remove socket file");
        }
        if let Err(e) = cleanup_pid_file(&self.pid_path) {
            warn!(error = %e, "Failed to remove PID file");
        }

        Ok(())
    }
}

/// Serve one caller.
async fn handle_connection(
    mut stream: UnixStream,
    context: &ConnectionContext,
) -> BrokerResult<ConnectionOutcome> {
    debug!("Connection accepted");

    let Some(chat_id) = context.store.current_chat_id() else {
        warn!("Verification requested but no identity is bound");
        write_reply(&mut stream, FAILURE_REPLY).await?;
        return Ok(ConnectionOutcome::NoBoundIdentity);
    };

    if caller_hung_up(&stream).await {
        info!("Caller hung up before a code was issued");
        return Ok(ConnectionOutcome::CallerGone);
    }

    let code = next_code(&context.range);
    debug!(issued_at = %code.issued_at, "Code issued");

    let text = delivery_text(&code);
    let outcome = match tokio::time::timeout(
        context.send_timeout,
        context.port.send(chat_id, &text),
    )
    .await
    {
        Ok(Ok(())) => ConnectionOutcome::Delivered,
        Ok(Err(e)) => {
            warn!(chat_id = %chat_id, error = %e, "Remote delivery failed");
            ConnectionOutcome::DeliveredLocallyOnly
        }
        Err(_) => {
            warn!(
                chat_id = %chat_id,
                timeout_ms = context.send_timeout.as_millis() as u64,
                "Remote delivery timed out"
            );
            ConnectionOutcome::DeliveredLocallyOnly
        }
    };

    write_reply(&mut stream, &code.to_string()).await?;
    Ok(outcome)
}

/// Whether the caller has fully closed its end.
///
/// A full close on a Unix stream shows up as a hang-up, which tokio reports
/// as write-closed. A caller that only shut down its write half can still
/// read the reply and is not treated as gone.
async fn caller_hung_up(stream: &UnixStream) -> bool {
    match tokio::time::timeout(
        IO_TIMEOUT,
        stream.ready(Interest::READABLE | Interest::WRITABLE),
    )
    .await
    {
        Ok(Ok(ready)) => ready.is_write_closed(),
        Ok(Err(_)) => true,
        Err(_) => false,
    }
}

/// Write `reply` without a trailing newline and close the write side.
async fn write_reply(stream: &mut UnixStream, reply: &str) -> BrokerResult<()> {
    let write = async {
        stream.write_all(reply.as_bytes()).await?;
        stream.flush().await?;
        stream.shutdown().await
    };

    match tokio::time::timeout(IO_TIMEOUT, write).await {
        Ok(result) => result.map_err(BrokerError::from),
        Err(_) => Err(BrokerError::Timeout),
    }
}
