//! Client config load/save for `~/.halo-chat/config.yaml`.
//! Two sections: `server.*` (endpoints, reconnect delay) and `request.*`
//! (the fixed fields merged into every outbound question).

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::endpoint::endpoint_url;
use crate::messages::OutboundConfig;

/// Env var that overrides the default config path.
pub const CONFIG_ENV: &str = "HALO_CHAT_CONFIG";

/// Server section (candidate endpoints, selected index, reconnect delay).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub selected: usize,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// How long one connect attempt may wait for the WebSocket handshake.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_endpoints() -> Vec<String> {
    ["localhost", "127.0.0.1", "0.0.0.0"]
        .iter()
        .map(|host| endpoint_url("ws", host, 8002, "halo/ws", "1"))
        .collect()
}

fn default_reconnect_delay_ms() -> u64 {
    3000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            selected: 0,
            reconnect_delay_ms: default_reconnect_delay_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl ServerSection {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Full config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub request: OutboundConfig,
}

/// Returns the default config file path: `~/.halo-chat/config.yaml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".halo-chat").join("config.yaml"))
}

/// Resolve the config path: explicit override, then `HALO_CHAT_CONFIG`, then the default.
pub fn resolve_config_path(override_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = override_path {
        return Some(p.to_path_buf());
    }
    if let Some(val) = std::env::var_os(CONFIG_ENV) {
        return Some(PathBuf::from(val));
    }
    default_config_path()
}

/// Load config from a YAML file.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load config from `path`; a missing file yields the defaults.
pub fn load_or_default(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        return Ok(Config::default());
    }
    load(path)
}

/// Save config to a YAML file. Creates parent directory if missing.
pub fn save(path: &Path, config: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }
    let contents = serde_yaml::to_string(config).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, contents).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Config load/save error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("writing config to {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}
