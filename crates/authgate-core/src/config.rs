//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: the API
//! base URL, auth endpoint paths, which storage backend holds the session,
//! and request/token timing.
//!
//! Configuration is stored at `~/.config/authgate/config.json`. The
//! `AUTHGATE_API_URL` and `AUTHGATE_STORAGE` environment variables override
//! the file.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::storage::{FileStorage, KeyringStorage, MemoryStorage, Storage};
use crate::transport::ReqwestTransport;

/// Application name used for config/data directory paths
pub const APP_NAME: &str = "authgate";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";

/// Access tokens are issued for 30 minutes unless the server says otherwise
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 30 * 60;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

pub const ENV_API_URL: &str = "AUTHGATE_API_URL";
pub const ENV_STORAGE: &str = "AUTHGATE_STORAGE";

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
            "file" => Ok(StorageBackend::File),
            "keyring" => Ok(StorageBackend::Keyring),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(anyhow::anyhow!("Unknown storage backend: {}", other)),
        }
    }
}

/// Paths of the auth endpoints, relative to the base URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub login: String,
    pub register: String,
    pub logout: String,
    pub me: String,
    pub refresh: String,
    pub health: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            login: "/api/v1/auth/login".to_string(),
            register: "/api/v1/auth/register".to_string(),
            logout: "/api/v1/auth/logout".to_string(),
            me: "/api/v1/auth/me".to_string(),
            refresh: "/api/v1/auth/refresh".to_string(),
            health: "/api/v1/auth/health".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub endpoints: Endpoints,
    pub storage: StorageBackend,
    pub keyring_service: Option<String>,
    pub request_timeout_secs: u64,
    /// Lifetime assumed for tokens whose response carries no `expires_in`
    pub token_lifetime_secs: i64,
    pub last_username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            endpoints: Endpoints::default(),
            storage: StorageBackend::default(),
            keyring_service: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            token_lifetime_secs: DEFAULT_TOKEN_LIFETIME_SECS,
            last_username: None,
        }
    }
}

impl Config {
    /// Load from the config file (defaults if absent), then apply env overrides.
    ///
    /// The result is for running with. Never save it back: the overrides
    /// would be written into the file.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_file()?;
        config.apply_env();
        Ok(config)
    }

    /// Load the config file alone, without env overrides
    pub fn load_file() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
        serde_json::from_str(&contents).context("Failed to parse config file")
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply `update` to the config file as stored, leaving env overrides out
    pub fn update_file(update: impl FnOnce(&mut Config)) -> Result<()> {
        Self::update_at(&Self::config_path()?, update)
    }

    pub fn update_at(path: &Path, update: impl FnOnce(&mut Config)) -> Result<()> {
        let mut config = Self::load_from(path)?;
        update(&mut config);
        config.save_to(path)
    }

    fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_API_URL) {
            if !url.trim().is_empty() {
                self.api_base_url = url.trim().to_string();
            }
        }
        if let Some(backend) = lookup(ENV_STORAGE) {
            match backend.parse() {
                Ok(b) => self.storage = b,
                Err(e) => warn!(error = %e, "Ignoring {}", ENV_STORAGE),
            }
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Resolve a path against the base URL. Absolute URLs pass through.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.api_base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Open the configured storage backend
    pub fn open_storage(&self) -> Result<Arc<dyn Storage>> {
        Ok(match self.storage {
            StorageBackend::File => Arc::new(FileStorage::in_dir(&self.data_dir()?)),
            StorageBackend::Keyring => match self.keyring_service {
                Some(ref service) => Arc::new(KeyringStorage::with_service(service.clone())),
                None => Arc::new(KeyringStorage::new()),
            },
            StorageBackend::Memory => Arc::new(MemoryStorage::new()),
        })
    }

    pub fn build_transport(&self) -> Result<ReqwestTransport> {
        ReqwestTransport::with_timeout(self.request_timeout()).context("Failed to build HTTP client")
    }
}
