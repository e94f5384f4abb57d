//! Logging initialization for the broker.
//!
//! Delegates to the observability package: structured JSONL goes to
//! `~/.televery/logs/televery.jsonl` and a compact copy goes to stderr
//! when running in the foreground.

use crate::Paths;
use observability::LogConfig;

/// Service name written into every log line.
const SERVICE_NAME: &str = "televery";

/// Initialize the logging system.
///
/// `RUST_LOG` takes precedence over `level`.
pub fn init_logging(level: &str, paths: &Paths, also_stderr: bool) {
    observability::init_with_config(LogConfig {
        service_name: SERVICE_NAME.into(),
        default_level: level.into(),
        log_path: Some(paths.log_file()),
        also_stderr,
        ..Default::default()
    });
}
