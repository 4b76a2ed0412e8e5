//! Configuration loading
//!
//! Provider credentials, dialog texts and bot settings live in a TOML file
//! in the platform config directory. The secrets the original deployment
//! read from the environment can still be supplied that way; environment
//! values override the file.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::auth::ProviderConfig;
use crate::bot::Messages;

fn default_max_code_attempts() -> u32 {
    3
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Identity-provider settings, injected into the auth components.
    pub provider: ProviderConfig,
    /// User-visible dialog texts.
    pub messages: Messages,
    /// Failed magic-code entries tolerated before the sign-in restarts.
    pub max_code_attempts: u32,
    /// Override for the downstream mail endpoint.
    pub mail_endpoint: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            messages: Messages::default(),
            max_code_attempts: default_max_code_attempts(),
            mail_endpoint: None,
        }
    }
}

impl AppConfig {
    fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "authbot", "authbot")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from disk, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        let mut config = if path.exists() {
            let content = fs::read_to_string(&path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env();
        Ok(config)
    }

    /// Save configuration to disk.
    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir).context("Failed to create config directory")?;

        let path = Self::config_path()?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content).context("Failed to write config file")?;

        // Set restrictive permissions on config file (contains the client secret)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&path, perms).context("Failed to set config permissions")?;
        }

        Ok(())
    }

    /// Environment variable names match the original deployment.
    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("AZUREAD_APP_ID") {
            self.provider.client_id = v;
        }
        if let Ok(v) = std::env::var("AZUREAD_APP_PASSWORD") {
            self.provider.client_secret = v;
        }
        if let Ok(v) = std::env::var("AZUREAD_APP_REALM") {
            self.provider.realm = v;
        }
        if let Ok(v) = std::env::var("AUTHBOT_CALLBACKHOST") {
            self.provider.callback_host = v;
        }
    }
}
