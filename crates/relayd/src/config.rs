//! Daemon configuration.
//!
//! Sources, lowest precedence first:
//!
//! 1. Built-in defaults
//! 2. TOML file at `$RELAY_CONFIG`, else `<config_dir>/relay/config.toml`
//! 3. `RELAY_HISTORY_ROOT` environment variable
//! 4. Command-line flags (applied by the binary)
//!
//! A missing config file is not an error; a malformed one is.

use std::env;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::store::{StoreConfig, COMMAND_BUFFER, EVENT_BUFFER, MAX_SESSIONS};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "RELAY_CONFIG";
/// Environment variable overriding `history_root`.
pub const HISTORY_ROOT_ENV: &str = "RELAY_HISTORY_ROOT";

const DEFAULT_LOG_FILTER: &str = "relayd=info,relay_core=info,relay_protocol=info";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
}

/// Effective daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Directory holding the agent's per-project transcript folders.
    pub history_root: PathBuf,
    pub command_buffer: usize,
    pub event_buffer: usize,
    pub max_sessions: usize,
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            history_root: default_history_root(),
            command_buffer: COMMAND_BUFFER,
            event_buffer: EVENT_BUFFER,
            max_sessions: MAX_SESSIONS,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl RelayConfig {
    /// Loads from the default locations and applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .or_else(default_config_path);

        let mut config = match path {
            Some(path) => Self::from_file(&path)?.unwrap_or_default(),
            None => Self::default(),
        };
        config.apply_env(|key| env::var(key).ok());
        Ok(config)
    }

    /// Reads a config file. `Ok(None)` if it does not exist.
    pub fn from_file(path: &Path) -> Result<Option<Self>, ConfigError> {
        let body = match std::fs::read_to_string(path) {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                return Ok(None);
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let config = toml::from_str(&body).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded config file");
        Ok(Some(config))
    }

    /// Applies environment overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(root) = lookup(HISTORY_ROOT_ENV).filter(|v| !v.trim().is_empty()) {
            self.history_root = PathBuf::from(root);
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            command_buffer: self.command_buffer,
            event_buffer: self.event_buffer,
            max_sessions: self.max_sessions,
        }
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// `~/.claude/projects`, or a relative `.claude/projects` without a home.
pub fn default_history_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".claude")
        .join("projects")
}

/// `<config_dir>/relay/config.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("relay").join("config.toml"))
}
