//! Process configuration: a TOML file plus `STAGEHAND_*` environment
//! overrides. Every field has a default, so the file itself is optional.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Settings read once at startup. Unlike the config lane they never change
/// while the process runs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    /// Where the lane snapshot lives and how often it is written.
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub themes: ThemesConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listen address of the HTTP and WebSocket server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding `state.json`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Delay between a lane change and the snapshot write.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThemesConfig {
    /// Directory containing one sub-directory per theme package.
    #[serde(default = "default_themes_dir")]
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Connect to the upstream chat and alert services.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "stagehand_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit one JSON object per line instead of text.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

/// `$XDG_CONFIG_HOME/stagehand`, then `$HOME/.config/stagehand`, then `./data`.
fn default_data_dir() -> PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(xdg).join("stagehand");
    }
    if let Some(home) = std::env::var_os("HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(home).join(".config").join("stagehand");
    }
    PathBuf::from("data")
}

fn default_debounce_ms() -> u64 {
    stagehand_store::DEFAULT_DEBOUNCE.as_millis() as u64
}

fn default_themes_dir() -> PathBuf {
    PathBuf::from("themes")
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl StorageConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for ThemesConfig {
    fn default() -> Self {
        Self {
            dir: default_themes_dir(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Reads `path` (a missing file means defaults) and applies the
/// environment on top.
///
/// Recognised variables:
/// - `STAGEHAND_HOST` overrides `server.host`
/// - `STAGEHAND_PORT` overrides `server.port`
/// - `STAGEHAND_DATA_DIR` overrides `storage.data_dir`
/// - `STAGEHAND_THEMES_DIR` overrides `themes.dir`
/// - `STAGEHAND_INGEST` overrides `ingest.enabled` ("false" or "0" disables)
/// - `STAGEHAND_LOG_LEVEL` overrides `logging.level`
/// - `STAGEHAND_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Fails only when the file exists but is unreadable or not valid TOML.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn apply_env(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("STAGEHAND_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("STAGEHAND_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(dir) = var("STAGEHAND_DATA_DIR").filter(|v| !v.trim().is_empty()) {
        config.storage.data_dir = PathBuf::from(dir);
    }
    if let Some(dir) = var("STAGEHAND_THEMES_DIR").filter(|v| !v.trim().is_empty()) {
        config.themes.dir = PathBuf::from(dir);
    }
    if let Some(flag) = var("STAGEHAND_INGEST") {
        config.ingest.enabled = !(flag == "false" || flag == "0");
    }
    if let Some(level) = var("STAGEHAND_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("STAGEHAND_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn every_section_is_optional() {
        let config: Config = toml::from_str("[server]\nport = 8080\n").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, default_host());
        assert_eq!(config.storage.debounce(), stagehand_store::DEFAULT_DEBOUNCE);
        assert!(config.ingest.enabled);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = load_config(path.to_str()).unwrap();
        assert_eq!(config.themes.dir, PathBuf::from("themes"));
    }

    #[test]
    fn unparsable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();
        assert!(matches!(
            load_config(path.to_str()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn environment_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            ("STAGEHAND_PORT", "9001"),
            ("STAGEHAND_HOST", "not-an-ip"),
            ("STAGEHAND_DATA_DIR", "/var/lib/stagehand"),
            ("STAGEHAND_INGEST", "0"),
            ("STAGEHAND_LOG_JSON", "true"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        apply_env(&mut config, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.server.port, 9001);
        assert_eq!(config.server.host, default_host(), "unparsable host is ignored");
        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/stagehand"));
        assert!(!config.ingest.enabled);
        assert!(config.logging.json);
    }
}
