// Local configuration for the Fresco client.
//
// Global config: `~/.fresco/config.toml`

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::ConnectError;

/// Root directory for Fresco local state: `~/.fresco/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".fresco"))
}

/// Path to the global config file: `~/.fresco/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("config.toml"))
}

/// Client configuration at `~/.fresco/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// REST API origin (e.g. `https://collab.example.com/api`). The
    /// collaboration socket lives on the same host, outside the API
    /// path, and upgrades to `wss` when this origin is `https`.
    pub api_base_url: String,
    /// Reconnection tuning.
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000/api".into(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Reconnection tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Automatic attempts before giving up.
    pub max_attempts: u32,
    /// Delay before the first attempt; later attempts double it.
    pub base_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self { max_attempts: 5, base_delay_ms: 1000 }
    }
}

impl ClientConfig {
    /// Load from `~/.fresco/config.toml`. Returns defaults if the file
    /// doesn't exist or can't be parsed.
    pub fn load() -> Self {
        global_config_path().and_then(|p| Self::load_from(&p).ok()).unwrap_or_default()
    }

    /// Load from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Save to `~/.fresco/config.toml`.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = global_config_path().ok_or_else(|| {
            ConfigError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "could not determine home directory",
            ))
        })?;
        self.save_to(&path)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, contents).map_err(ConfigError::Io)
    }

    /// The authenticated socket endpoint for a session.
    ///
    /// Derived from the REST origin: `wss` for an `https` API, `ws`
    /// otherwise, same host and port, with the access token embedded as
    /// a query parameter (the browser-grade handshake has no headers).
    pub fn collaborate_url(
        &self,
        session_id: &str,
        access_token: &str,
    ) -> Result<Url, ConnectError> {
        let api = Url::parse(&self.api_base_url).map_err(|error| {
            ConnectError::InvalidOrigin(format!(
                "invalid api_base_url `{}`: {error}",
                self.api_base_url
            ))
        })?;

        let ws_scheme = match api.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => {
                return Err(ConnectError::InvalidOrigin(format!(
                    "api_base_url must use http or https, got `{other}`"
                )))
            }
        };
        let host = api
            .host_str()
            .ok_or_else(|| ConnectError::InvalidOrigin("api_base_url has no host".into()))?;

        let mut endpoint = format!("{ws_scheme}://{host}");
        if let Some(port) = api.port() {
            endpoint.push_str(&format!(":{port}"));
        }
        endpoint.push_str(&format!("/ws/collaborate/{session_id}/?token={access_token}"));

        Url::parse(&endpoint).map_err(|error| ConnectError::InvalidOrigin(error.to_string()))
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config I/O error: {e}"),
            Self::Parse(e) => write!(f, "config parse error: {e}"),
            Self::Serialize(e) => write!(f, "config serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}
