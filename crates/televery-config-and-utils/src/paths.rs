//! File system paths for the broker.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Listener socket filename under the base directory.
const SOCKET_NAME: &str = "televery.sock";
/// Bound identity filename under the base directory.
const IDENTITY_FILE_NAME: &str = "chat_id";

/// Manages file system paths for the broker.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory for runtime files (~/.televery)
    base_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance rooted at `~/.televery`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(".televery"),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory (~/.televery).
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the config file path (~/.televery/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the default listener socket path (~/.televery/televery.sock).
    ///
    /// `Config::socket_path` takes precedence when set.
    pub fn socket_file(&self) -> PathBuf {
        self.base_dir.join(SOCKET_NAME)
    }

    /// Get the persisted bound identity path (~/.televery/chat_id).
    pub fn identity_file(&self) -> PathBuf {
        self.base_dir.join(IDENTITY_FILE_NAME)
    }

    /// Get the PID file path (~/.televery/televery.pid).
    pub fn pid_file(&self) -> PathBuf {
        self.base_dir.join("televery.pid")
    }

    /// Get the logs directory (~/.televery/logs).
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Get the structured log file path (~/.televery/logs/televery.jsonl).
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("televery.jsonl")
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
