//! SETTINGS: Configuration management for AgentWire
//!
//! Loads and saves server, stream, engine, store and client parameters.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod paths;

pub use paths::{config_path, data_dir, expand_home};

/// Errors in configuration handling
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("◆ CONFIG IO ERROR: {0}")]
    Io(#[from] std::io::Error),

    #[error("◆ CONFIG PARSE FAILED: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// HTTP listener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Undelivered frames buffered per stream before the producer waits
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8787
}

fn default_channel_capacity() -> usize {
    1024
}

/// Bearer tokens accepted by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub tokens: Vec<String>,
}

/// Trace normalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Chain whose completion carries the final answer
    #[serde(default = "default_top_level_agent")]
    pub top_level_agent: String,
    #[serde(default = "default_tool_name")]
    pub default_tool_name: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            top_level_agent: default_top_level_agent(),
            default_tool_name: default_tool_name(),
        }
    }
}

fn default_top_level_agent() -> String {
    "agent".to_string()
}

fn default_tool_name() -> String {
    "unknown".to_string()
}

/// Agent engine selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    /// JSON-lines trace script; echo engine when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(default)]
    pub step_delay_ms: u64,
}

/// Message persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_dir")]
    pub dir: String,
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: default_store_dir(),
            max_messages: default_max_messages(),
        }
    }
}

fn default_store_dir() -> String {
    "~/.agentwire/chats".to_string()
}

fn default_max_messages() -> usize {
    100
}

/// Remote endpoint used by `agentwire chat`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub token: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            token: String::new(),
        }
    }
}

fn default_endpoint() -> String {
    format!("http://{}:{}", default_host(), default_port())
}

/// Root configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

impl Config {
    /// Load from the default location
    pub async fn load() -> Result<Self> {
        let path = config_path();
        Self::load_from(&path).await
    }

    /// Load from specific location
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("◆ NO CONFIG AT {:?}, USING DEFAULTS", path);
            return Ok(Config::default());
        }

        debug!("◆ READING CONFIG FROM {:?}", path);
        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save to the default location
    pub async fn save(&self) -> Result<()> {
        let path = config_path();
        self.save_to(&path).await
    }

    /// Save to specific location
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        debug!("◆ WRITING CONFIG TO {:?}", path);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// `host:port` for the listener
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn store_dir(&self) -> PathBuf {
        expand_home(&self.store.dir)
    }

    pub fn script_path(&self) -> Option<PathBuf> {
        self.engine
            .script
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(expand_home)
    }

    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.engine.step_delay_ms)
    }

    /// Whether requests must carry a bearer token
    pub fn auth_required(&self) -> bool {
        !self.auth.tokens.is_empty()
    }

    /// Client token, if one is configured
    pub fn client_token(&self) -> Option<String> {
        let token = self.client.token.trim();
        if token.is_empty() {
            None
        } else {
            Some(token.to_string())
        }
    }

    /// Fresh configuration sharing one generated token between server and client
    pub fn with_generated_token() -> Self {
        let token = uuid::Uuid::new_v4().simple().to_string();
        let mut config = Config::default();
        config.auth.tokens.push(token.clone());
        config.client.token = token;
        config
    }
}

/// Create the configuration at `path` unless one exists, then load it
pub async fn init_at(path: &Path) -> Result<Config> {
    if path.exists() {
        warn!("◆ CONFIG ALREADY EXISTS AT {:?}", path);
    } else {
        Config::with_generated_token().save_to(path).await?;
        info!("◆ CONFIG CREATED AT {:?}", path);
    }

    Config::load_from(path).await
}

/// Initialize the data directory and default configuration
pub async fn init() -> Result<Config> {
    let config = init_at(&config_path()).await?;

    let store_dir = config.store_dir();
    paths::ensure_dir(&store_dir).await?;
    info!("◆ CHAT STORE READY AT {:?}", store_dir);

    Ok(config)
}
