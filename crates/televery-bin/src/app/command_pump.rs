//! Inbound command pump.
//!
//! Long-polls the notification port and forwards bind commands to the
//! dispatcher. Transport errors back off exponentially and are never fatal.

use notification_port::{BindCommand, NotificationPort};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(30);
const BACKOFF_CAP_EXPONENT: u32 = 5;

/// Spawn the command pump. It stops on shutdown or when the dispatcher is gone.
pub fn spawn_command_pump(
    port: Arc<dyn NotificationPort>,
    commands: mpsc::Sender<BindCommand>,
    shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(run_command_pump(port, commands, shutdown))
}

async fn run_command_pump(
    port: Arc<dyn NotificationPort>,
    commands: mpsc::Sender<BindCommand>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut backoff = PumpBackoff::default();

    loop {
        let polled = tokio::select! {
            _ = shutdown.recv() => {
                info!("Command pump received shutdown signal");
                break;
            }
            polled = port.poll_commands() => polled,
        };

        match polled {
            Ok(batch) => {
                if backoff.failures > 0 {
                    info!(
                        previous_failures = backoff.failures,
                        "Command pump recovered after transport failures"
                    );
                }
                backoff.reset();

                for command in batch {
                    if commands.send(command).await.is_err() {
                        debug!("Bind dispatcher gone, stopping command pump");
                        return;
                    }
                }
            }
            Err(e) => {
                let delay = backoff.next_delay();
                warn!(
                    error = %e,
                    transient = e.is_transient(),
                    failure_count = backoff.failures,
                    retry_in_ms = delay.as_millis() as u64,
                    "Polling inbound commands failed; backing off"
                );

                tokio::select! {
                    _ = shutdown.recv() => {
                        info!("Command pump received shutdown signal");
                        break;
                    }
                    _ = sleep(delay) => {}
                }
            }
        }
    }

    debug!("Command pump task stopped");
}

#[derive(Debug, Default)]
struct PumpBackoff {
    failures: u32,
}

impl PumpBackoff {
    fn reset(&mut self) {
        self.failures = 0;
    }

    fn next_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let shift = (self.failures - 1).min(BACKOFF_CAP_EXPONENT);
        let delay = BACKOFF_BASE.saturating_mul(1u32 << shift);
        delay.min(BACKOFF_MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use identity_store::ChatId;
    use notification_port::{TransportError, TransportResult};
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    #[test]
    fn backoff_doubles_from_one_second_and_caps() {
        let mut backoff = PumpBackoff::default();
        let delays: Vec<u64> = (0..8).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn backoff_reset_starts_over() {
        let mut backoff = PumpBackoff::default();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), BACKOFF_BASE);
    }

    /// Replays scripted poll results, then idles.
    struct ScriptedPort {
        script: Mutex<VecDeque<TransportResult<Vec<BindCommand>>>>,
        polls: Mutex<u32>,
    }

    #[async_trait]
    impl NotificationPort for ScriptedPort {
        async fn send(&self, _identity: ChatId, _text: &str) -> TransportResult<()> {
            Ok(())
        }

        async fn poll_commands(&self) -> TransportResult<Vec<BindCommand>> {
            *self.polls.lock() += 1;
            let next = self.script.lock().pop_front();
            match next {
                Some(result) => result,
                None => {
                    sleep(Duration::from_secs(3600)).await;
                    Ok(Vec::new())
                }
            }
        }
    }

    fn bind(label: &str, id: i64) -> BindCommand {
        BindCommand {
            label: Some(label.to_string()),
            identity: ChatId(id),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn forwards_commands_and_survives_transport_errors() {
        let port = Arc::new(ScriptedPort {
            script: Mutex::new(VecDeque::from(vec![
                Ok(vec![bind("alice", 1)]),
                Err(TransportError::Timeout),
                Err(TransportError::Decode("garbage".into())),
                Ok(vec![bind("bob", 2), bind("eve", 3)]),
            ])),
            polls: Mutex::new(0),
        });
        let (tx, mut rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = spawn_command_pump(port.clone(), tx, shutdown_rx);

        let mut received = Vec::new();
        for _ in 0..3 {
            received.push(rx.recv().await.unwrap());
        }
        assert_eq!(received, vec![bind("alice", 1), bind("bob", 2), bind("eve", 3)]);
        assert!(*port.polls.lock() >= 4);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn stops_when_dispatcher_is_gone() {
        let port = Arc::new(ScriptedPort {
            script: Mutex::new(VecDeque::from(vec![Ok(vec![bind("alice", 1)])])),
            polls: Mutex::new(0),
        });
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = spawn_command_pump(port, tx, shutdown_rx);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("pump did not stop")
            .unwrap();
    }
}
