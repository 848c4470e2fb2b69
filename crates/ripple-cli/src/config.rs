//! Configuration file support

use ripple_client::ReconnectPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for ripple
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Chat endpoint
    pub url: Option<String>,
    /// Whether interactive mode connects on startup (true by default)
    pub auto_connect: Option<bool>,
    /// Reconnect backoff overrides
    pub reconnect: ReconnectConfig,
}

/// Reconnect configuration; unset fields keep the built-in defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ripple")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("RIPPLE_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from the default location
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load config from `path`, falling back to defaults on any problem
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Save config to `path`
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let policy = ReconnectPolicy::default();
        let default_config = Config {
            url: Some(ripple_client::DEFAULT_URL.to_string()),
            auto_connect: Some(true),
            reconnect: ReconnectConfig {
                max_attempts: Some(policy.max_attempts),
                initial_delay_ms: Some(policy.initial_delay.as_millis() as u64),
                max_delay_ms: Some(policy.max_delay.as_millis() as u64),
            },
        };

        default_config.save_to(&path)?;
        Ok(path)
    }

    /// Reconnect policy with this file's overrides applied
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        let mut policy = ReconnectPolicy::default();
        if let Some(max_attempts) = self.reconnect.max_attempts {
            policy.max_attempts = max_attempts;
        }
        if let Some(ms) = self.reconnect.initial_delay_ms {
            policy.initial_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.reconnect.max_delay_ms {
            policy.max_delay = Duration::from_millis(ms);
        }
        policy
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# ripple configuration file
# Place at ~/.config/ripple/config.toml (Linux/Mac) or %APPDATA%\ripple\config.toml (Windows)
# Set RIPPLE_CONFIG_PATH to use a different file

# Chat endpoint (ws:// or wss://)
url = "ws://localhost:8080/ws"

# Connect as soon as interactive mode starts
auto_connect = true

# Automatic reconnects after an unexpected close.
# The n-th reconnect waits initial_delay_ms * 2^n, capped at max_delay_ms.
[reconnect]
max_attempts = 5
initial_delay_ms = 1000
max_delay_ms = 30000
"#
}
