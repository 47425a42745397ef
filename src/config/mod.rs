//! Application configuration.
//!
//! TOML file with one section per concern. Lookup order: explicit path,
//! `./inbox-bridge.config.toml`, `~/.inbox-bridge/inbox-bridge.config.toml`,
//! `CONFIG_PATH`; if nothing exists a default file is written so there is
//! always something to edit.

use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

/// Embedded default configuration file
const DEFAULT_CONFIG: &str = include_str!("../../inbox-bridge.config.toml");

/// Configuration file name
const CONFIG_FILE_NAME: &str = "inbox-bridge.config.toml";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub live: LiveSourceConfig,
    #[serde(default)]
    pub chatlog: ChatLogSourceConfig,
    #[serde(default)]
    pub callrec: CallRecordSourceConfig,
    #[serde(default)]
    pub extcall: ExternalCallSourceConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            enable_cors: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LiveSourceConfig {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub account_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatLogSourceConfig {
    #[serde(default = "default_chatlog_path")]
    pub db_path: String,
}

impl Default for ChatLogSourceConfig {
    fn default() -> Self {
        Self {
            db_path: default_chatlog_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecordSourceConfig {
    #[serde(default = "default_callrec_path")]
    pub db_path: String,
}

impl Default for CallRecordSourceConfig {
    fn default() -> Self {
        Self {
            db_path: default_callrec_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExternalCallSourceConfig {
    #[serde(default)]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_sync_interval")]
    pub interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sync_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_true() -> bool {
    true
}
fn default_db_path() -> String {
    "~/.inbox-bridge/unified_inbox.duckdb".to_string()
}
fn default_chatlog_path() -> String {
    "~/.inbox-bridge/sources/chatlog.duckdb".to_string()
}
fn default_callrec_path() -> String {
    "~/.inbox-bridge/sources/callrec.duckdb".to_string()
}
fn default_sync_interval() -> u64 {
    300
}
fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from the standard locations, writing the embedded
    /// default file if none exists.
    pub fn load() -> Result<Self> {
        if let Ok(content) = std::fs::read_to_string(CONFIG_FILE_NAME) {
            return toml::from_str(&content)
                .with_context(|| format!("parsing {}", CONFIG_FILE_NAME));
        }

        if let Some(base_dirs) = BaseDirs::new() {
            let home_config = base_dirs
                .home_dir()
                .join(".inbox-bridge")
                .join(CONFIG_FILE_NAME);
            if let Ok(content) = std::fs::read_to_string(&home_config) {
                return toml::from_str(&content)
                    .with_context(|| format!("parsing {}", home_config.display()));
            }
        }

        if let Ok(config_path) = std::env::var("CONFIG_PATH") {
            if let Ok(content) = std::fs::read_to_string(&config_path) {
                return toml::from_str(&content)
                    .with_context(|| format!("parsing {}", config_path));
            }
        }

        // No config file found: create one from the embedded default.
        tracing::info!(
            "no configuration file found; creating {} with default settings",
            CONFIG_FILE_NAME
        );
        if let Err(e) = std::fs::write(CONFIG_FILE_NAME, DEFAULT_CONFIG) {
            tracing::warn!(
                "could not create {}: {}; continuing with in-memory defaults",
                CONFIG_FILE_NAME,
                e
            );
        }

        toml::from_str(DEFAULT_CONFIG).context("parsing embedded default config")
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_default_config_parses() {
        let config: AppConfig = toml::from_str(DEFAULT_CONFIG).expect("default config parses");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.sync.interval_secs, 300);
        assert_eq!(config.logging.level, "info");
        assert!(config.database.path.ends_with("unified_inbox.duckdb"));
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config: AppConfig = toml::from_str("[server]\nport = 8080\n").expect("parses");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.sync.interval_secs, 300);
        assert!(config.live.endpoint.is_empty());
    }
}
