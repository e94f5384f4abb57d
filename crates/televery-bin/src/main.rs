//! Televery - local second-factor verification broker.
//!
//! Local programs connect to a Unix socket and get a fresh one-time code
//! back. The same code is sent to the remote chat bound with `/start`.

mod app;

use std::path::PathBuf;
use std::process::ExitCode;

use app::{AppError, AppResult};
use clap::{Parser, Subcommand};
use televery_config_and_utils::{init_logging, Config, Paths};

/// Televery command-line interface.
#[derive(Parser)]
#[command(name = "televery")]
#[command(about = "Local verification code broker with Telegram delivery")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for runtime files (socket, logs, config). Defaults to ~/.televery
    #[arg(long, global = true, env = "TELEVERY_HOME")]
    base_dir: Option<PathBuf>,

    /// Config file to read instead of `<base_dir>/config.json`
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the broker
    Start {
        /// Also log to stderr
        #[arg(short, long)]
        foreground: bool,
    },
    /// Stop the broker
    Stop,
    /// Check broker status
    Status,
    /// Request a verification code and print it
    Request,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: Cli) -> AppResult<()> {
    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new().map_err(AppError::Config)?,
    };
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(&paths),
    }
    .map_err(AppError::Config)?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    match cli.command {
        Some(Commands::Start { foreground }) => {
            init_logging(&config.log_level, &paths, foreground);
            app::run_broker(config, paths).await
        }
        None => {
            // Default to start in foreground if no command given
            init_logging(&config.log_level, &paths, true);
            app::run_broker(config, paths).await
        }
        Some(Commands::Stop) => app::stop_broker(&config, &paths).await,
        Some(Commands::Status) => app::check_status(&config, &paths),
        Some(Commands::Request) => app::request_code(&config, &paths).await,
    }
}
