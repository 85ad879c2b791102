//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: backend
//! URLs, timeouts, the token refresh buffer and where session state lives.
//!
//! Configuration is stored at `~/.config/anima/config.json`. The backend URLs
//! and storage can be overridden from the environment (`ANIMA_BASE_URL`,
//! `ANIMA_LOGIN_URL`, `ANIMA_STORAGE`), applied on top of the file by `load`
//! and left out of the file by `save`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "anima";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Production backend.
pub const DEFAULT_BASE_URL: &str = "https://proyectoanimabackend-production.up.railway.app";

/// Timeout for ordinary API requests.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 20;

/// Login gets a shorter timeout so a hung auth server fails fast.
const DEFAULT_LOGIN_TIMEOUT_SECS: u64 = 10;

/// Refresh the access token this long before it actually expires.
const DEFAULT_REFRESH_BUFFER_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Keyring,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "keyring" | "keychain" => Ok(Self::Keyring),
            "memory" => Ok(Self::Memory),
            other => Err(anyhow::anyhow!("Unknown storage backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    /// Separate login host, when the deployment splits auth from the API.
    pub login_url: Option<String>,
    pub request_timeout_secs: u64,
    pub login_timeout_secs: u64,
    pub refresh_buffer_secs: u64,
    pub storage: StorageBackend,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            login_url: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            login_timeout_secs: DEFAULT_LOGIN_TIMEOUT_SECS,
            refresh_buffer_secs: DEFAULT_REFRESH_BUFFER_SECS,
            storage: StorageBackend::File,
            last_email: None,
        }
    }
}

/// Values taken from `ANIMA_*` variables. They apply to the running process
/// only and never reach the config file.
#[derive(Debug, Default)]
struct EnvOverrides {
    base_url: Option<String>,
    login_url: Option<String>,
    storage: Option<StorageBackend>,
}

impl EnvOverrides {
    fn read<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let storage = lookup("ANIMA_STORAGE").and_then(|backend| match backend.parse() {
            Ok(backend) => Some(backend),
            Err(e) => {
                warn!(error = %e, "Ignoring ANIMA_STORAGE");
                None
            }
        });
        Self {
            base_url: lookup("ANIMA_BASE_URL").filter(|v| !v.trim().is_empty()),
            login_url: lookup("ANIMA_LOGIN_URL").filter(|v| !v.trim().is_empty()),
            storage,
        }
    }
}

impl Config {
    /// Load the config file (defaults if absent) and apply environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?, |key| std::env::var(key).ok())
    }

    fn load_from<F>(path: &Path, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::read_file(path)?;
        config.apply_env(lookup);
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&contents).context("Failed to parse config file")
    }

    /// Write the config file. Fields currently overridden from the
    /// environment keep the value the file already has.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?, |key| std::env::var(key).ok())
    }

    fn save_to<F>(&self, path: &Path, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let overrides = EnvOverrides::read(lookup);
        let mut persisted = self.clone();
        if overrides.base_url.is_some() || overrides.login_url.is_some() || overrides.storage.is_some() {
            let on_disk = Self::read_file(path)?;
            if overrides.base_url.is_some() {
                persisted.base_url = on_disk.base_url;
            }
            if overrides.login_url.is_some() {
                persisted.login_url = on_disk.login_url;
            }
            if overrides.storage.is_some() {
                persisted.storage = on_disk.storage;
            }
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(&persisted)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply overrides from a variable lookup (the process environment in `load`).
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let overrides = EnvOverrides::read(lookup);
        if let Some(url) = overrides.base_url {
            self.base_url = url;
        }
        if let Some(url) = overrides.login_url {
            self.login_url = Some(url);
        }
        if let Some(backend) = overrides.storage {
            self.storage = backend;
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory for the optional log file.
    pub fn log_dir() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME).join("logs"))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Base URL without a trailing slash.
    pub fn api_base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Login host, falling back to the API base.
    pub fn login_base(&self) -> &str {
        self.login_url
            .as_deref()
            .map(|url| url.trim_end_matches('/'))
            .unwrap_or_else(|| self.api_base())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    pub fn refresh_buffer(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_buffer_secs as i64)
    }
}
