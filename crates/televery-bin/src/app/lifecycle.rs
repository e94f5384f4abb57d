//! Broker lifecycle commands (stop, status, request).

use crate::app::AppResult;
use televery_config_and_utils::{Config, Paths};
use televery_lifecycle::{check_singleton, BrokerInfo, SingletonCheck};
use tokio::time::{sleep, Duration};
use verification_broker::VerificationClient;

/// Time the broker gets to exit after SIGTERM before SIGKILL.
const STOP_GRACE_POLLS: u32 = 50;
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Stop the broker.
pub async fn stop_broker(config: &Config, paths: &Paths) -> AppResult<()> {
    let mut info = BrokerInfo::new(config.socket_path(paths), paths.pid_file());
    info.load_pid()?;

    if !info.is_running() {
        println!("Broker is not running");
        info.cleanup()?;
        return Ok(());
    }

    // Running means the PID file named a live process.
    let Some(pid) = info.pid else {
        println!("Broker PID file changed while stopping, try again");
        return Ok(());
    };

    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
    println!("Sent SIGTERM to PID {}", pid);

    for _ in 0..STOP_GRACE_POLLS {
        sleep(STOP_POLL_INTERVAL).await;
        if !info.socket_path.exists() {
            info.cleanup()?;
            println!("Broker stopped");
            return Ok(());
        }
    }

    println!(
        "Broker did not stop gracefully, sending SIGKILL to PID {}",
        pid
    );
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGKILL);
    }
    info.cleanup()?;
    println!("Broker killed");
    Ok(())
}

/// Check broker status.
pub fn check_status(config: &Config, paths: &Paths) -> AppResult<()> {
    let socket_path = config.socket_path(paths);
    let mut info = BrokerInfo::new(socket_path.clone(), paths.pid_file());
    info.load_pid()?;

    match check_singleton(&socket_path, &paths.pid_file()) {
        SingletonCheck::AlreadyRunning => {
            println!("Broker is running");
            if let Some(pid) = info.pid {
                println!("  PID:      {}", pid);
            }
            println!("  Socket:   {}", socket_path.display());
            println!("  Identity: {}", paths.identity_file().display());
        }
        SingletonCheck::StaleSocketCleaned => {
            println!("Broker is not running (removed stale socket)");
            if let Some(pid) = info.pid {
                println!("  PID {} from the last run is gone", pid);
            }
        }
        SingletonCheck::Occupied => {
            println!(
                "Broker is not running ({} is not a socket)",
                socket_path.display()
            );
        }
        SingletonCheck::Available => {
            println!("Broker is not running (socket not found)");
        }
    }

    Ok(())
}

/// Request a code from the running broker and print it.
pub async fn request_code(config: &Config, paths: &Paths) -> AppResult<()> {
    let code = VerificationClient::new(config.socket_path(paths))
        .request_code()
        .await?;
    println!("{}", code);
    Ok(())
}
