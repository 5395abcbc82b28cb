//! Client configuration
//!
//! Defaults, then an optional TOML file, then environment overrides
//! (a `.env` file in the working directory is honored).

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_SERVER_URL: &str = "http://localhost:3333/";
pub const DEFAULT_SOCKET_URL: &str = "ws://localhost:3333/ws";
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5000;

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the REST API
    pub server_url: String,

    /// URL of the server-push websocket
    pub socket_url: String,

    /// Fixed delay before each reconnection attempt
    pub reconnect_delay_ms: u64,

    /// Capacity of the status and event broadcast channels
    pub event_capacity: usize,

    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,

    /// Optional log file, stderr otherwise
    pub file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            socket_url: DEFAULT_SOCKET_URL.to_string(),
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            event_capacity: 1024,
            log: LogConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl ClientConfig {
    /// Config pointing at a server listening on `addr` (host:port)
    pub fn for_addr(addr: &str) -> Self {
        Self {
            server_url: format!("http://{}/", addr),
            socket_url: format!("ws://{}/ws", addr),
            ..Self::default()
        }
    }

    /// Load configuration from an optional TOML file plus the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(path)?,
            Some(path) => bail!("config file {} not found", path.display()),
            None => Self::default(),
        };

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("CLASSIFY_SERVER_URL") {
            self.server_url = url;
        }
        if let Ok(url) = std::env::var("CLASSIFY_SOCKET_URL") {
            self.socket_url = url;
        }
        if let Ok(delay) = std::env::var("CLASSIFY_RECONNECT_MS") {
            self.reconnect_delay_ms = delay
                .parse()
                .with_context(|| format!("CLASSIFY_RECONNECT_MS is not a number: {}", delay))?;
        }
        if let Ok(level) = std::env::var("CLASSIFY_LOG") {
            self.log.level = level;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.server_base()?;

        let socket = Url::parse(&self.socket_url)
            .with_context(|| format!("invalid socket url: {}", self.socket_url))?;
        if !matches!(socket.scheme(), "ws" | "wss") {
            bail!("socket url must use ws:// or wss://, got {}", self.socket_url);
        }

        if self.reconnect_delay_ms == 0 {
            bail!("reconnect_delay_ms must be greater than zero");
        }
        if self.event_capacity == 0 {
            bail!("event_capacity must be greater than zero");
        }
        Ok(())
    }

    /// REST base URL, always ending with a slash so relative paths join under it
    pub fn server_base(&self) -> Result<Url> {
        let mut raw = self.server_url.clone();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Url::parse(&raw).with_context(|| format!("invalid server url: {}", self.server_url))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}
