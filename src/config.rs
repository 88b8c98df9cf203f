//! Configuration loading with layered overrides.
//!
//! Loaded in order, each layer overriding the previous:
//! 1. Default values
//! 2. Config file (TOML)
//! 3. Environment variables (`PAGETREE_*` by default)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_MAP_SIZE, DEFAULT_MAX_READERS, DEFAULT_TX_TIMEOUT, MAX_TREE_DEPTH, MIN_MAP_SIZE,
};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// LMDB environment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_path")]
    pub path: PathBuf,
    #[serde(default = "default_map_size")]
    pub map_size: usize,
    #[serde(default = "default_max_readers")]
    pub max_readers: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            map_size: default_map_size(),
            max_readers: default_max_readers(),
        }
    }
}

impl StorageConfig {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), ..Self::default() }
    }
}

fn default_path() -> PathBuf {
    PathBuf::from("data/pagetree")
}

fn default_map_size() -> usize {
    DEFAULT_MAP_SIZE
}

fn default_max_readers() -> u32 {
    DEFAULT_MAX_READERS
}

/// Tree mutation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound for one structural transaction.
    #[serde(default = "default_tx_timeout_ms")]
    pub tx_timeout_ms: u64,
    #[serde(default = "default_max_tree_depth")]
    pub max_tree_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tx_timeout_ms: default_tx_timeout_ms(),
            max_tree_depth: default_max_tree_depth(),
        }
    }
}

impl EngineConfig {
    pub fn tx_timeout(&self) -> Duration {
        Duration::from_millis(self.tx_timeout_ms)
    }
}

fn default_tx_timeout_ms() -> u64 {
    DEFAULT_TX_TIMEOUT.as_millis() as u64
}

fn default_max_tree_depth() -> usize {
    MAX_TREE_DEPTH
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port() }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine.tx_timeout_ms == 0 {
            return Err(Error::Config("engine.tx_timeout_ms must be positive".into()));
        }
        if self.engine.max_tree_depth == 0 {
            return Err(Error::Config("engine.max_tree_depth must be positive".into()));
        }
        if self.storage.map_size < MIN_MAP_SIZE {
            return Err(Error::Config(format!(
                "storage.map_size must be at least {MIN_MAP_SIZE} bytes"
            )));
        }
        Ok(())
    }
}

/// Builder for loading configuration with a custom environment prefix.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// e.g. "PAGETREE" -> PAGETREE_DB_PATH, PAGETREE_PORT
    pub env_prefix: String,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self { env_prefix: "PAGETREE".to_string() }
    }
}

impl ConfigLoader {
    pub fn new(env_prefix: impl Into<String>) -> Self {
        Self { env_prefix: env_prefix.into() }
    }

    pub fn load(&self, config_path: Option<&Path>) -> Result<Config> {
        let mut config = match config_path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .map_err(|e| Error::Config(format!("Failed to read config file: {e}")))?;
                toml::from_str(&content)
                    .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?
            }
            None => Config::default(),
        };

        self.apply_env(&mut config, |name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env<F>(&self, config: &mut Config, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let prefix = &self.env_prefix;
        if let Some(path) = var(&format!("{prefix}_DB_PATH")) {
            config.storage.path = PathBuf::from(path);
        }
        if let Some(size) = var(&format!("{prefix}_MAP_SIZE")) {
            config.storage.map_size = parse_var("MAP_SIZE", &size)?;
        }
        if let Some(ms) = var(&format!("{prefix}_TX_TIMEOUT_MS")) {
            config.engine.tx_timeout_ms = parse_var("TX_TIMEOUT_MS", &ms)?;
        }
        if let Some(host) = var(&format!("{prefix}_HOST")) {
            config.server.host = host;
        }
        if let Some(port) = var(&format!("{prefix}_PORT")) {
            config.server.port = parse_var("PORT", &port)?;
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("invalid value for {name}: '{value}'")))
}
