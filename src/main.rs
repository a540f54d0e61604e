use anyhow::{Context as _, Result};
use clap::Parser;
use std::sync::Arc;
use taskd::{config::ServerConfig, rest, storage::Storage, AppContext};
use tracing::info;

#[derive(Parser)]
#[command(
    name = "taskd",
    about = "taskd — task-management REST service",
    version
)]
struct Args {
    /// REST server port
    #[arg(long, env = "TASKD_PORT")]
    port: Option<u16>,

    /// Data directory for config.toml and the SQLite database
    #[arg(long, env = "TASKD_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "TASKD_LOG")]
    log: Option<String>,

    /// Bind address for the REST server (default: 127.0.0.1; use 0.0.0.0 for LAN access)
    #[arg(long, env = "TASKD_BIND")]
    bind_address: Option<String>,

    /// Write logs to this file path (rotated daily). Optional.
    #[arg(long, env = "TASKD_LOG_FILE")]
    log_file: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = ServerConfig::new(args.port, args.data_dir, args.log, args.bind_address);

    // ── Logging setup ────────────────────────────────────────────────────────
    // Init once — must happen before any tracing calls.
    let _file_guard = setup_logging(&config.log, args.log_file.as_deref(), &config.log_format);

    run_server(config).await
}

async fn run_server(config: ServerConfig) -> Result<()> {
    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .with_context(|| format!("failed to create data dir {}", config.data_dir.display()))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %config.data_dir.display(),
        "starting taskd"
    );

    let storage = Arc::new(
        Storage::new_with_slow_query(
            &config.data_dir,
            config.observability.slow_query_threshold_ms,
        )
        .await
        .context("failed to open task database")?,
    );

    let ctx = Arc::new(AppContext::new(Arc::new(config), storage));
    rest::start_rest_server(ctx).await
}

/// Initialize the tracing subscriber.
/// If `log_file` is set, logs go to both stdout and a daily-rolling file.
/// Returns a `WorkerGuard` that must stay alive for the process lifetime.
///
/// `log_format` may be `"pretty"` (default, human-readable compact format) or
/// `"json"` (structured JSON for log aggregators like Loki/Elasticsearch).
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
            .unwrap_or_else(|| std::ffi::OsStr::new("taskd.log"));

        // Ensure the directory exists before tracing-appender tries to open it.
        if let Err(e) = std::fs::create_dir_all(dir) {
            // Fall back to stdout-only — don't panic on a bad log path.
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
