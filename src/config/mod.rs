use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::error;

const DEFAULT_PORT: u16 = 4520;
const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 300;

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

/// `{data_dir}/config.toml` — all fields are optional overrides.
/// Priority: CLI / env var  >  TOML  >  built-in default.
#[derive(Deserialize, Default)]
struct TomlConfig {
    /// REST server port (default: 4520).
    port: Option<u16>,
    /// Bind address (default: "127.0.0.1"; use "0.0.0.0" for LAN access).
    bind_address: Option<String>,
    /// Log level filter string, e.g. "debug", "info,taskforge=trace" (default: "info").
    log: Option<String>,
    /// Log output format: "pretty" (default, human-readable) | "json" (structured).
    log_format: Option<String>,
    /// Seconds between expired-task cleanup passes (default: 300; 0 = disabled).
    cleanup_interval_secs: Option<u64>,
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

#[derive(Debug, Clone)]
pub struct ForgeConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    /// Bind address for the REST server (TASKFORGE_BIND env var).
    pub bind_address: String,
    pub log: String,
    /// "pretty" (default) | "json".
    pub log_format: String,
    /// Seconds between cleanup passes (0 = disabled).
    pub cleanup_interval_secs: u64,
}

impl ForgeConfig {
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

        let toml = load_toml(&data_dir).unwrap_or_default();

        let port = port.or(toml.port).unwrap_or(DEFAULT_PORT);
        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());

        let bind_address = bind_address
            .or(std::env::var("TASKFORGE_BIND").ok().filter(|s| !s.is_empty()))
            .or(toml.bind_address)
            .unwrap_or_else(default_bind_address);

        let log_format = std::env::var("TASKFORGE_LOG_FORMAT")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.log_format)
            .unwrap_or_else(|| "pretty".to_string());

        let cleanup_interval_secs = std::env::var("TASKFORGE_CLEANUP_INTERVAL")
            .ok()
            .and_then(|s| s.parse().ok())
            .or(toml.cleanup_interval_secs)
            .unwrap_or(DEFAULT_CLEANUP_INTERVAL_SECS);

        Self {
            port,
            data_dir,
            bind_address,
            log,
            log_format,
            cleanup_interval_secs,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs_home()
        .map(|home| home.join(".taskforge"))
        .unwrap_or_else(|| PathBuf::from(".taskforge"))
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_a_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ForgeConfig::new(None, Some(dir.path().to_path_buf()), None, None);
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.log, "info");
        assert_eq!(cfg.cleanup_interval_secs, DEFAULT_CLEANUP_INTERVAL_SECS);
    }

    #[test]
    fn cli_beats_toml_beats_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "port = 9000\nlog = \"debug\"\ncleanup_interval_secs = 60\n",
        )
        .unwrap();

        let cfg = ForgeConfig::new(Some(9100), Some(dir.path().to_path_buf()), None, None);
        assert_eq!(cfg.port, 9100); // CLI wins
        assert_eq!(cfg.log, "debug"); // TOML wins over default
        assert_eq!(cfg.cleanup_interval_secs, 60);
    }

    #[test]
    fn malformed_toml_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "port = \"not a number").unwrap();
        let cfg = ForgeConfig::new(None, Some(dir.path().to_path_buf()), None, None);
        assert_eq!(cfg.port, DEFAULT_PORT);
    }
}
