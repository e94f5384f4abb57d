//! Broker initialization.

use crate::app::bind_dispatcher::spawn_bind_dispatcher;
use crate::app::command_pump::spawn_command_pump;
use crate::app::{AppError, AppResult};
use identity_store::{BindGate, IdentityStore, TrustList};
use notification_port::{NotificationPort, TelegramConfig, TelegramTransport};
use std::sync::Arc;
use std::time::Duration;
use televery_config_and_utils::{Config, Paths};
use televery_lifecycle::BrokerInfo;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use verification_broker::{BrokerResult, CodeRange, VerificationServer};

/// Bound on pending bind commands between the pump and the dispatcher.
const BIND_QUEUE_CAPACITY: usize = 32;

/// How long background tasks get to finish after shutdown is broadcast.
const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Run the broker until SIGINT or SIGTERM.
pub async fn run_broker(config: Config, paths: Paths) -> AppResult<()> {
    config.validate()?;
    paths.ensure_dirs()?;

    let (lo, hi) = config.code_range;
    let range = CodeRange::new(lo, hi)?;

    let transport: Arc<dyn NotificationPort> = Arc::new(TelegramTransport::new(TelegramConfig {
        api_url: config.telegram_api_url()?,
        token: config.bot_token()?.to_string(),
        poll_timeout: config.poll_timeout(),
    }));

    run_with_transport(config, paths, range, transport).await
}

/// Everything after config validation, with the transport injected.
async fn run_with_transport(
    config: Config,
    paths: Paths,
    range: CodeRange,
    transport: Arc<dyn NotificationPort>,
) -> AppResult<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let socket_path = config.socket_path(&paths);

    let store = Arc::new(IdentityStore::open(paths.identity_file()));
    let trust_list: TrustList = config.trusted_users.iter().collect();
    let gate = Arc::new(BindGate::new(trust_list, store.clone()));

    info!(
        socket = %socket_path.display(),
        trusted_users = gate.trust_list().len(),
        code_range = ?config.code_range,
        send_timeout_ms = config.send_timeout_ms,
        "Starting Televery broker"
    );
    if store.current_chat_id().is_none() {
        info!("No identity bound yet; waiting for /start");
    }

    let server = Arc::new(
        VerificationServer::new(&socket_path, store, transport.clone(), range)
            .with_send_timeout(config.send_timeout())
            .with_pid_file(paths.pid_file()),
    );
    let listener = server.bind()?;
    let broker_info = BrokerInfo::new(socket_path.clone(), paths.pid_file());
    info!(pid = std::process::id(), "Broker started");

    let (bind_tx, bind_rx) = mpsc::channel(BIND_QUEUE_CAPACITY);
    let dispatcher = spawn_bind_dispatcher(gate, transport.clone(), config.send_timeout(), bind_rx);
    let pump = spawn_command_pump(transport, bind_tx, server.shutdown_receiver());

    let serving = server.clone();
    let mut server_task: JoinHandle<BrokerResult<()>> =
        tokio::spawn(async move { serving.serve(listener).await });

    let server_result = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            None
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down");
            None
        }
        joined = &mut server_task => Some(joined),
    };

    server.shutdown();
    let server_result = match server_result {
        Some(joined) => joined,
        None => server_task.await,
    };

    join_task("command pump", pump).await;
    join_task("bind dispatcher", dispatcher).await;

    if let Err(e) = broker_info.cleanup() {
        warn!(error = %e, "Failed to clean up runtime files");
    }
    info!("Broker stopped");

    match server_result {
        Ok(result) => result.map_err(AppError::from),
        Err(e) => Err(AppError::Task(e.to_string())),
    }
}

async fn join_task(name: &str, handle: JoinHandle<()>) {
    match tokio::time::timeout(TASK_JOIN_TIMEOUT, handle).await {
        Ok(Ok(())) => debug!(task = name, "Task joined"),
        Ok(Err(e)) => warn!(task = name, error = %e, "Task ended abnormally"),
        Err(_) => warn!(task = name, "Task did not stop in time"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use identity_store::ChatId;
    use notification_port::{BindCommand, TransportResult};
    use parking_lot::Mutex;
    use verification_broker::VerificationClient;

    /// Hands out one `/start` from `ksqsf`, then idles.
    struct OneBindPort {
        pending: Mutex<Option<BindCommand>>,
        sent: Mutex<Vec<(ChatId, String)>>,
    }

    #[async_trait]
    impl NotificationPort for OneBindPort {
        async fn send(&self, identity: ChatId, text: &str) -> TransportResult<()> {
            self.sent.lock().push((identity, text.to_string()));
            Ok(())
        }

        async fn poll_commands(&self) -> TransportResult<Vec<BindCommand>> {
            let next = self.pending.lock().take();
            match next {
                Some(command) => Ok(vec![command]),
                None => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(Vec::new())
                }
            }
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.bot_token = Some("123:abc".into());
        config.trusted_users.insert("ksqsf".into());
        config
    }

    #[tokio::test]
    async fn missing_token_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let err = run_broker(Config::default(), paths).await.unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn non_socket_at_endpoint_exits_with_3() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());
        paths.ensure_dirs().unwrap();
        std::fs::write(paths.socket_file(), "occupied").unwrap();

        let err = run_broker(test_config(), paths).await.unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn bind_then_request_then_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());
        paths.ensure_dirs().unwrap();
        let config = test_config();
        let socket_path = config.socket_path(&paths);

        let port = Arc::new(OneBindPort {
            pending: Mutex::new(Some(BindCommand {
                label: Some("ksqsf".into()),
                identity: ChatId(42),
            })),
            sent: Mutex::new(Vec::new()),
        });

        let broker = tokio::spawn(run_with_transport(
            config,
            paths.clone(),
            CodeRange::default(),
            port.clone(),
        ));

        // Wait for the bind acknowledgement.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while port.sent.lock().is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "bind never acknowledged");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(paths.pid_file().exists());

        let code = VerificationClient::new(&socket_path)
            .request_code()
            .await
            .unwrap();
        assert_eq!(code.len(), 4);

        let sent = port.sent.lock().clone();
        assert_eq!(sent[0], (ChatId(42), "OK! Chat ID 42 has been saved.".to_string()));
        assert_eq!(
            sent[1],
            (ChatId(42), format!("New verification request, code is {}", code))
        );

        // SIGTERM to ourselves exercises the signal path.
        unsafe {
            libc::kill(std::process::id() as libc::pid_t, libc::SIGTERM);
        }
        broker.await.unwrap().unwrap();

        assert!(!socket_path.exists());
        assert!(!paths.pid_file().exists());
        assert_eq!(
            std::fs::read_to_string(paths.identity_file()).unwrap().trim(),
            "42"
        );
    }
}
