use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::error;

const DEFAULT_PORT: u16 = 3000;

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

// ─── ObservabilityConfig ─────────────────────────────────────────────────────

/// Server observability configuration (`[observability]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log SQLite queries that exceed this threshold (milliseconds). Default: 100.
    /// Set to 0 to disable slow query logging.
    pub slow_query_threshold_ms: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            slow_query_threshold_ms: 100,
        }
    }
}

// ─── TOML config file ─────────────────────────────────────────────────────────

/// `{data_dir}/config.toml` — all fields are optional overrides.
/// Priority: CLI / env var  >  TOML  >  built-in default.
#[derive(Deserialize, Default)]
struct TomlConfig {
    /// REST server port (default: 3000).
    port: Option<u16>,
    /// Log level filter string, e.g. "debug", "info,taskd=trace" (default: "info").
    log: Option<String>,
    /// Bind address for the REST server (default: "127.0.0.1"; use "0.0.0.0" for LAN access).
    bind_address: Option<String>,
    /// Log output format: "pretty" (default, human-readable) | "json" (structured for log aggregators).
    log_format: Option<String>,
    /// Observability configuration (`[observability]`).
    observability: Option<ObservabilityConfig>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}

// ─── ServerConfig ─────────────────────────────────────────────────────────────

/// Resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// REST server port.
    pub port: u16,
    /// Data directory holding the SQLite database and config.toml.
    pub data_dir: PathBuf,
    /// Log level filter string.
    pub log: String,
    /// Bind address for the REST listener.
    pub bind_address: String,
    /// Log output format: "pretty" (default) | "json".
    pub log_format: String,
    /// Observability: slow query threshold.
    pub observability: ObservabilityConfig,
}

impl ServerConfig {
    /// Build config from CLI/env args + optional TOML file.
    ///
    /// Priority (highest to lowest):
    ///   1. CLI / env — passed as `Some(value)` from clap
    ///   2. TOML file at `{data_dir}/config.toml`
    ///   3. Built-in defaults
    pub fn new(
        port: Option<u16>,
        data_dir: Option<PathBuf>,
        log: Option<String>,
        bind_address: Option<String>,
    ) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);

        // Load TOML as the lowest-priority override layer
        let toml = load_toml(&data_dir).unwrap_or_default();

        let port = port.or(toml.port).unwrap_or(DEFAULT_PORT);
        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());

        let bind_address = bind_address
            .or(toml.bind_address)
            .unwrap_or_else(default_bind_address);

        let log_format = std::env::var("TASKD_LOG_FORMAT")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.log_format)
            .unwrap_or_else(|| "pretty".to_string());

        let observability = toml.observability.unwrap_or_default();

        Self {
            port,
            data_dir,
            log,
            bind_address,
            log_format,
            observability,
        }
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        // ~/Library/Application Support/taskd
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("taskd");
        }
    }
    #[cfg(target_os = "linux")]
    {
        // $XDG_DATA_HOME/taskd or ~/.local/share/taskd
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("taskd");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("taskd");
        }
    }
    #[cfg(target_os = "windows")]
    {
        // %APPDATA%\taskd
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("taskd");
        }
    }
    // Fallback
    PathBuf::from(".taskd")
}
