//! Application configuration management.
//!
//! This module handles loading and saving the session configuration: the API
//! base URL, network timeout, the authentication-stop code set, which backend
//! holds durable credentials, and the last used username.
//!
//! Configuration is stored at `~/.config/sessionward/config.json`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "sessionward";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Overrides `api_base_url`.
pub const ENV_API_URL: &str = "SESSIONWARD_API_URL";

/// Enables at-rest sealing of the credential file when set.
pub const ENV_STORE_PASSPHRASE: &str = "SESSIONWARD_STORE_PASSPHRASE";

const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api/v1";

/// Every network call, refresh and logout included, is bounded by this.
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 8000;

const DEFAULT_SERVER_ERROR_RETRIES: u32 = 2;

const DEFAULT_INITIAL_BACKOFF_MS: u64 = 500;

/// 401 body codes that mean the session cannot be recovered by refreshing.
pub const DEFAULT_TERMINAL_AUTH_CODES: &[&str] = &[
    "TOKEN_INVALIDATED",
    "USER_LOGGED_OUT",
    "REFRESH_REVOKED",
    "NO_AUTH_CONTEXT",
];

/// Where durable (remembered) credentials live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DurableBackend {
    /// JSON file in the cache directory, optionally sealed.
    #[default]
    File,
    /// OS keychain.
    Keyring,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub request_timeout_ms: u64,
    pub terminal_auth_codes: Vec<String>,
    pub durable_backend: DurableBackend,
    pub server_error_retries: u32,
    pub initial_backoff_ms: u64,
    pub last_username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            terminal_auth_codes: DEFAULT_TERMINAL_AUTH_CODES
                .iter()
                .map(|code| code.to_string())
                .collect(),
            durable_backend: DurableBackend::default(),
            server_error_retries: DEFAULT_SERVER_ERROR_RETRIES,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            last_username: None,
        }
    }
}

impl Config {
    /// Load the config file (or defaults) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply `SESSIONWARD_*` environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(ENV_API_URL) {
            if !url.trim().is_empty() {
                self.api_base_url = url.trim().to_string();
            }
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    /// Passphrase for sealing the credential file, if one is configured.
    pub fn store_passphrase() -> Option<String> {
        std::env::var(ENV_STORE_PASSPHRASE)
            .ok()
            .filter(|p| !p.is_empty())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}

// ============================================================================
// Tests
// ============================================================================
