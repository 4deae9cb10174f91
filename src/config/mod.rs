//! Configuration and session file locations

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::RoutePolicy;

/// Environment variable overriding `base_url`
pub const BASE_URL_ENV: &str = "FABLES_BASE_URL";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the Fables API
    pub base_url: String,
    /// Timeout applied to API calls, including the token refresh
    pub request_timeout_secs: u64,
    /// Persist tokens between runs
    pub persist: bool,
    /// Where the route hook sends unauthenticated users
    pub login_path: String,
    /// Treat a session without a refresh token as signed out
    pub require_refresh_token: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            request_timeout_secs: 10,
            persist: true,
            login_path: "/login".to_string(),
            require_refresh_token: true,
        }
    }
}

impl Config {
    fn project_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("com", "fables", "fables-session")
    }

    /// Get config file path
    fn config_path() -> Result<PathBuf> {
        let dirs = Self::project_dirs().context("Could not determine config directory")?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Path of the persisted session file, if this environment has a data
    /// directory at all
    pub fn session_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.data_dir().join("session.toml"))
    }

    /// Load configuration from the platform config directory, without any
    /// overrides.
    ///
    /// A headless environment without a home directory gets the defaults.
    pub fn load_file() -> Result<Self> {
        match Self::config_path() {
            Ok(path) => Self::load_from(&path),
            Err(e) => {
                tracing::debug!("{:#}, using defaults", e);
                Ok(Self::default())
            }
        }
    }

    /// Apply a command-line `base_url`, falling back to the environment
    /// override, and validate the result.
    ///
    /// The overrides only live in the returned value; the file is untouched.
    pub fn with_overrides(mut self, base_url: Option<String>) -> Result<Self> {
        if let Some(url) = base_url.or_else(|| std::env::var(BASE_URL_ENV).ok()) {
            self.base_url = url;
        }
        self.validate()?;
        Ok(self)
    }

    /// Load configuration from `path`; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).context("Failed to read config file")?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Save configuration to the platform config directory
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Check that `base_url` is an http(s) URL
    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.base_url)
            .with_context(|| format!("Invalid base_url '{}'", self.base_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("base_url must be http or https, got '{}'", url.scheme());
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn route_policy(&self) -> RoutePolicy {
        RoutePolicy {
            login_path: self.login_path.clone(),
            require_refresh_token: self.require_refresh_token,
        }
    }
}
