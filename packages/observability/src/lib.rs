//! # Observability
//!
//! Centralized structured logging for Televery.
//!
//! Services call `observability::init_with_config()` once at startup and use
//! standard `tracing` macros everywhere else. Every event is written as one
//! JSON object per line to the configured log file, and optionally echoed to
//! stderr in compact form.
//!
//! Field values whose key appears in [`REDACTED_FIELDS`] are replaced with
//! `[redacted]` before they reach the file, so verification codes and
//! credentials never land on disk.
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "televery".into(),
//!     default_level: "debug".into(),
//!     also_stderr: true,
//!     ..Default::default()
//! });
//! tracing::info!("ready");
//! ```

mod file_writer;
mod json_layer;

use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub use file_writer::LogFileWriter;
pub use json_layer::{JsonLayer, LogEntry, REDACTED_FIELDS};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, included in every log line.
    pub service_name: String,

    /// Default log level filter. Overridden by `RUST_LOG`.
    pub default_level: String,

    /// Log file path. Defaults to `~/.televery/logs/televery.jsonl`.
    pub log_path: Option<PathBuf>,

    /// Also emit logs to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

fn default_log_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".televery").join("logs").join("televery.jsonl"))
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize the logging layer with custom configuration.
///
/// If the log file cannot be opened, logging falls back to stderr only.
/// Calling this more than once is a no-op.
pub fn init_with_config(config: LogConfig) {
    let log_path = config.log_path.clone().or_else(default_log_path);

    let json_layer = match log_path.as_deref().map(LogFileWriter::open) {
        Some(Ok(writer)) => Some(
            JsonLayer::new(config.service_name.clone(), writer)
                .with_filter(env_filter(&config.default_level)),
        ),
        Some(Err(err)) => {
            eprintln!(
                "failed to open log file {:?}: {}; logging to stderr only",
                log_path, err
            );
            None
        }
        None => None,
    };

    let stderr_wanted = config.also_stderr || json_layer.is_none();
    let stderr_layer = stderr_wanted.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(std::io::stderr)
            .with_filter(env_filter(&config.default_level))
    });

    let installed = tracing_subscriber::registry()
        .with(json_layer)
        .with(stderr_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(
            service = %config.service_name,
            log_path = ?log_path,
            "observability initialized"
        );
    }
}
