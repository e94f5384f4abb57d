//! Broker lifecycle management.
//!
//! Handles the singleton check on the listener endpoint, stale socket
//! cleanup left behind by a crashed run, and the PID file.

use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Errors from lifecycle management.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PID file error: {0}")]
    PidFile(String),
}

/// Result of checking the listener endpoint before binding.
#[derive(Debug, PartialEq, Eq)]
pub enum SingletonCheck {
    /// Nothing at the path, safe to bind.
    Available,
    /// A socket left by a previous run was found and removed.
    StaleSocketCleaned,
    /// The socket belongs to a broker whose process is still alive.
    AlreadyRunning,
    /// Something other than a socket occupies the path. It is left untouched.
    Occupied,
}

/// Decide who owns the endpoint at `socket_path` without connecting to it.
///
/// Connecting to a live broker is itself a verification request, so
/// liveness comes from the PID file instead: the socket belongs to a
/// running broker only while `pid_path` names a live process. Otherwise
/// the socket is stale and removed. Regular files, directories and other
/// non-socket objects are never removed.
pub fn check_singleton(socket_path: &Path, pid_path: &Path) -> SingletonCheck {
    let metadata = match std::fs::symlink_metadata(socket_path) {
        Ok(metadata) => metadata,
        Err(_) => return SingletonCheck::Available,
    };

    if !metadata.file_type().is_socket() {
        return SingletonCheck::Occupied;
    }

    match read_pid_file(pid_path) {
        Ok(Some(pid)) if is_process_alive(pid) => return SingletonCheck::AlreadyRunning,
        Ok(pid) => debug!(
            socket = %socket_path.display(),
            pid = ?pid,
            "No live owner for endpoint socket"
        ),
        Err(err) => debug!(
            pid_file = %pid_path.display(),
            error = %err,
            "Unreadable PID file, treating endpoint as stale"
        ),
    }

    let _ = std::fs::remove_file(socket_path);
    info!(socket = %socket_path.display(), "Removed stale endpoint socket");
    SingletonCheck::StaleSocketCleaned
}

/// Whether a process with `pid` exists. Signal 0 only checks for existence.
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    // EPERM: the process exists but belongs to someone else.
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Write the current process PID to the given path.
pub fn write_pid_file(pid_path: &Path) -> Result<u32, LifecycleError> {
    let pid = std::process::id();
    if let Some(parent) = pid_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(pid_path, pid.to_string())?;
    Ok(pid)
}

/// Read a PID from the given file.
pub fn read_pid_file(pid_path: &Path) -> Result<Option<u32>, LifecycleError> {
    if !pid_path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(pid_path)?;
    let pid = content
        .trim()
        .parse::<u32>()
        .map_err(|e| LifecycleError::PidFile(format!("Invalid PID: {}", e)))?;
    Ok(Some(pid))
}

/// Clean up PID file if it exists.
pub fn cleanup_pid_file(pid_path: &Path) -> Result<(), LifecycleError> {
    if pid_path.exists() {
        std::fs::remove_file(pid_path)?;
    }
    Ok(())
}

/// Remove the endpoint socket if it exists and is a socket.
pub fn cleanup_socket_file(socket_path: &Path) -> Result<(), LifecycleError> {
    match std::fs::symlink_metadata(socket_path) {
        Ok(metadata) if metadata.file_type().is_socket() => {
            std::fs::remove_file(socket_path)?;
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Runtime files of a broker instance.
#[derive(Debug, Clone)]
pub struct BrokerInfo {
    pub pid: Option<u32>,
    pub socket_path: PathBuf,
    pub pid_path: PathBuf,
}

impl BrokerInfo {
    pub fn new(socket_path: PathBuf, pid_path: PathBuf) -> Self {
        Self {
            pid: None,
            socket_path,
            pid_path,
        }
    }

    /// Load PID from the PID file.
    pub fn load_pid(&mut self) -> Result<(), LifecycleError> {
        self.pid = read_pid_file(&self.pid_path)?;
        Ok(())
    }

    /// Check if a live broker owns the socket. Never connects to it.
    ///
    /// A stale socket is removed as a side effect.
    pub fn is_running(&self) -> bool {
        check_singleton(&self.socket_path, &self.pid_path) == SingletonCheck::AlreadyRunning
    }

    /// Clean up socket and PID file.
    pub fn cleanup(&self) -> Result<(), LifecycleError> {
        cleanup_socket_file(&self.socket_path)?;
        cleanup_pid_file(&self.pid_path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;
    use std::os::unix::net::UnixListener;
    use tempfile::TempDir;

    fn tmp() -> TempDir {
        tempfile::tempdir().unwrap()
    }

    fn bind_listener_or_skip(socket_path: &Path) -> Option<UnixListener> {
        match UnixListener::bind(socket_path) {
            Ok(listener) => Some(listener),
            Err(err) if err.kind() == ErrorKind::PermissionDenied => None,
            Err(err) => panic!("failed to bind unix listener at {:?}: {}", socket_path, err),
        }
    }

    // =========================================================================
    // SingletonCheck tests
    // =========================================================================

    /// PID that cannot belong to a live process (above any pid_max).
    const DEAD_PID: &str = "2147483647";

    fn write_own_pid(pid_path: &Path) {
        std::fs::write(pid_path, std::process::id().to_string()).unwrap();
    }

    #[test]
    fn singleton_available_when_no_socket() {
        let dir = tmp();
        let socket = dir.path().join("televery.sock");
        let pid = dir.path().join("televery.pid");
        assert_eq!(check_singleton(&socket, &pid), SingletonCheck::Available);
    }

    #[test]
    fn singleton_occupied_by_regular_file_is_left_alone() {
        let dir = tmp();
        let socket = dir.path().join("televery.sock");
        let pid = dir.path().join("televery.pid");
        std::fs::write(&socket, "not a socket").unwrap();

        assert_eq!(check_singleton(&socket, &pid), SingletonCheck::Occupied);
        assert!(socket.exists());
    }

    #[test]
    fn singleton_occupied_by_directory() {
        let dir = tmp();
        let socket = dir.path().join("televery.sock");
        std::fs::create_dir(&socket).unwrap();

        assert_eq!(
            check_singleton(&socket, &dir.path().join("televery.pid")),
            SingletonCheck::Occupied
        );
    }

    #[test]
    fn singleton_already_running_when_owner_alive() {
        let dir = tmp();
        let socket = dir.path().join("televery.sock");
        let pid = dir.path().join("televery.pid");
        let Some(_listener) = bind_listener_or_skip(&socket) else {
            return;
        };
        write_own_pid(&pid);

        assert_eq!(check_singleton(&socket, &pid), SingletonCheck::AlreadyRunning);
        assert!(socket.exists());
    }

    #[test]
    fn singleton_check_never_connects_to_live_socket() {
        let dir = tmp();
        let socket = dir.path().join("televery.sock");
        let pid = dir.path().join("televery.pid");
        let Some(listener) = bind_listener_or_skip(&socket) else {
            return;
        };
        listener.set_nonblocking(true).unwrap();
        write_own_pid(&pid);

        for _ in 0..3 {
            assert_eq!(check_singleton(&socket, &pid), SingletonCheck::AlreadyRunning);
        }
        let info = BrokerInfo::new(socket.clone(), pid.clone());
        assert!(info.is_running());

        match listener.accept() {
            Err(err) => assert_eq!(err.kind(), ErrorKind::WouldBlock),
            Ok(_) => panic!("liveness check opened a connection"),
        }
    }

    #[test]
    fn singleton_stale_socket_removed_when_owner_dead() {
        let dir = tmp();
        let socket = dir.path().join("televery.sock");
        let pid = dir.path().join("televery.pid");
        let Some(_listener) = bind_listener_or_skip(&socket) else {
            return;
        };
        std::fs::write(&pid, DEAD_PID).unwrap();

        assert_eq!(check_singleton(&socket, &pid), SingletonCheck::StaleSocketCleaned);
        assert!(!socket.exists());
    }

    #[test]
    fn singleton_stale_socket_removed_without_pid_file() {
        let dir = tmp();
        let socket = dir.path().join("televery.sock");
        {
            let Some(_listener) = bind_listener_or_skip(&socket) else {
                return;
            };
        }
        // Listener dropped, socket file still on disk
        assert!(socket.exists());
        assert_eq!(
            check_singleton(&socket, &dir.path().join("televery.pid")),
            SingletonCheck::StaleSocketCleaned
        );
        assert!(!socket.exists());
    }

    #[test]
    fn singleton_stale_when_pid_file_is_garbage() {
        let dir = tmp();
        let socket = dir.path().join("televery.sock");
        let pid = dir.path().join("televery.pid");
        let Some(_listener) = bind_listener_or_skip(&socket) else {
            return;
        };
        std::fs::write(&pid, "not-a-pid").unwrap();

        assert_eq!(check_singleton(&socket, &pid), SingletonCheck::StaleSocketCleaned);
    }

    #[test]
    fn process_alive_checks() {
        assert!(is_process_alive(std::process::id()));
        assert!(!is_process_alive(0));
        assert!(!is_process_alive(DEAD_PID.parse().unwrap()));
        assert!(!is_process_alive(u32::MAX));
    }

    // =========================================================================
    // PID file tests
    // =========================================================================

    #[test]
    fn write_then_read_roundtrip() {
        let dir = tmp();
        let pid_path = dir.path().join("televery.pid");
        let written = write_pid_file(&pid_path).unwrap();
        assert!(written > 0);
        assert_eq!(read_pid_file(&pid_path).unwrap(), Some(written));
    }

    #[test]
    fn read_pid_file_missing_returns_none() {
        let dir = tmp();
        let pid = read_pid_file(&dir.path().join("nonexistent.pid")).unwrap();
        assert_eq!(pid, None);
    }

    #[test]
    fn read_pid_file_invalid_content_returns_error() {
        let dir = tmp();
        let pid_path = dir.path().join("televery.pid");
        std::fs::write(&pid_path, "not-a-number").unwrap();

        let result = read_pid_file(&pid_path);
        assert!(matches!(result, Err(LifecycleError::PidFile(_))));
    }

    #[test]
    fn read_pid_file_with_whitespace() {
        let dir = tmp();
        let pid_path = dir.path().join("televery.pid");
        std::fs::write(&pid_path, "  42  \n").unwrap();
        assert_eq!(read_pid_file(&pid_path).unwrap(), Some(42));
    }

    #[test]
    fn cleanup_pid_file_noop_when_missing() {
        let dir = tmp();
        cleanup_pid_file(&dir.path().join("missing.pid")).unwrap();
    }

    #[test]
    fn cleanup_socket_file_keeps_regular_files() {
        let dir = tmp();
        let path = dir.path().join("televery.sock");
        std::fs::write(&path, "stub").unwrap();

        cleanup_socket_file(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn cleanup_socket_file_removes_socket() {
        let dir = tmp();
        let path = dir.path().join("televery.sock");
        {
            let Some(_listener) = bind_listener_or_skip(&path) else {
                return;
            };
        }
        cleanup_socket_file(&path).unwrap();
        assert!(!path.exists());
    }

    // =========================================================================
    // BrokerInfo tests
    // =========================================================================

    #[test]
    fn broker_info_load_pid() {
        let dir = tmp();
        let pid_path = dir.path().join("televery.pid");
        std::fs::write(&pid_path, "9876").unwrap();

        let mut info = BrokerInfo::new(dir.path().join("televery.sock"), pid_path);
        info.load_pid().unwrap();
        assert_eq!(info.pid, Some(9876));
    }

    #[test]
    fn broker_info_is_running_with_live_owner() {
        let dir = tmp();
        let socket_path = dir.path().join("televery.sock");
        let pid_path = dir.path().join("televery.pid");
        let Some(_listener) = bind_listener_or_skip(&socket_path) else {
            return;
        };
        write_own_pid(&pid_path);

        let info = BrokerInfo::new(socket_path, pid_path);
        assert!(info.is_running());
    }

    #[test]
    fn broker_info_not_running_without_socket() {
        let dir = tmp();
        let info = BrokerInfo::new(
            dir.path().join("televery.sock"),
            dir.path().join("televery.pid"),
        );
        assert!(!info.is_running());
        info.cleanup().unwrap();
    }

    #[test]
    fn error_display() {
        assert!(LifecycleError::PidFile("bad content".to_string())
            .to_string()
            .contains("bad content"));
    }
}
