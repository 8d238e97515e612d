use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use taskforge::config::ForgeConfig;
use taskforge::manager::Manager;
use taskforge::model::now_ts;
use taskforge::rest;
use taskforge::scheduler::{CronTimers, Scheduler};
use taskforge::store::SqliteStore;
use taskforge::AppContext;

#[derive(Parser)]
#[command(
    name = "taskforged",
    about = "TaskForge — task orchestration daemon",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// REST server port
    #[arg(long, env = "TASKFORGE_PORT")]
    port: Option<u16>,

    /// Data directory for the SQLite database and config
    #[arg(long, env = "TASKFORGE_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "TASKFORGE_LOG")]
    log: Option<String>,

    /// Bind address (default: 127.0.0.1; use 0.0.0.0 for LAN access)
    #[arg(long, env = "TASKFORGE_BIND")]
    bind_address: Option<String>,

    /// Write logs to this file path (rotated daily). Optional.
    #[arg(long, env = "TASKFORGE_LOG_FILE")]
    log_file: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the daemon server (default when no subcommand given).
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Init once — must happen before any tracing calls.
    let log_level = args.log.as_deref().unwrap_or("info").to_owned();
    let log_format =
        std::env::var("TASKFORGE_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());
    let _file_guard = setup_logging(&log_level, args.log_file.as_deref(), &log_format);

    match args.command {
        None | Some(Command::Serve) => {
            run_server(args.port, args.data_dir, args.log, args.bind_address).await?;
        }
    }

    Ok(())
}

async fn run_server(
    port: Option<u16>,
    data_dir: Option<std::path::PathBuf>,
    log: Option<String>,
    bind_address: Option<String>,
) -> Result<()> {
    let config = ForgeConfig::new(port, data_dir, log, bind_address);
    info!(data_dir = %config.data_dir.display(), "starting taskforged");

    let store = Arc::new(SqliteStore::new(&config.data_dir).await?);
    let manager = Manager::new(store);

    let timers = Arc::new(CronTimers::new());
    let scheduler = Arc::new(Scheduler::new(Arc::new(manager.clone()), timers));
    scheduler.start().await?;

    if config.cleanup_interval_secs > 0 {
        spawn_cleanup_loop(manager.clone(), config.cleanup_interval_secs);
    }

    let ctx = Arc::new(AppContext {
        config,
        manager,
        scheduler,
        started_at: now_ts(),
    });
    rest::start_rest_server(ctx).await
}

/// Periodically purge tasks whose cleanup entries have expired.
fn spawn_cleanup_loop(manager: Manager, interval_secs: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.tick().await; // immediate first tick, skip it
        loop {
            ticker.tick().await;
            if let Err(e) = manager.run_cleanup_pass(now_ts()).await {
                warn!(error = %e, "cleanup pass failed");
            }
        }
    });
}

/// Initialize the tracing subscriber.
/// If `log_file` is set, logs go to both stdout and a daily-rolling file.
/// Returns a `WorkerGuard` that must stay alive for the process lifetime.
///
/// `log_format` may be `"pretty"` (default, human-readable compact format) or
/// `"json"` (structured JSON for log aggregators).
///
/// If the log directory cannot be created, falls back to stdout-only logging
/// with a warning — never panics.
fn setup_logging(
    log_level: &str,
    log_file: Option<&std::path::Path>,
    log_format: &str,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let use_json = log_format == "json";

    if let Some(path) = log_file {
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let filename = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("taskforged.log"));

        // Ensure the directory exists before tracing-appender tries to open it.
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!(
                "warn: could not create log directory '{}': {e} — falling back to stdout",
                dir.display()
            );
            if use_json {
                tracing_subscriber::fmt().json().with_env_filter(log_level).init();
            } else {
                tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
            }
            return None;
        }

        let appender = tracing_appender::rolling::daily(dir, filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        if use_json {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().json())
                .with(fmt::layer().json().with_writer(non_blocking))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().compact())
                .with(fmt::layer().with_writer(non_blocking))
                .init();
        }

        Some(guard)
    } else if use_json {
        tracing_subscriber::fmt().json().with_env_filter(log_level).init();
        None
    } else {
        tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
        None
    }
}
