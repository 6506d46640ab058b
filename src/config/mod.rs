//! Configuration and credential storage

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::auth::{Session, StoredToken};

/// A persisted signed-in session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSession {
    pub uid: String,
    pub email: String,
    pub display_name: String,
    pub id_token: StoredToken,
    pub refresh_token: String,
}

/// Application configuration
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Backend web API key (from `pigeon setup`)
    pub api_key: Option<String>,
    /// Backend project id (from `pigeon setup`)
    pub project_id: Option<String>,
    /// Cached session from the last successful login
    pub session: Option<StoredSession>,
}

impl Config {
    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("io", "pigeon-cli", "pigeon-cli")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get config file path
    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir).context("Failed to create config directory")?;

        let path = Self::config_path()?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content).context("Failed to write config file")?;

        // Set restrictive permissions on config file (contains tokens)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&path, perms).context("Failed to set config permissions")?;
        }

        Ok(())
    }

    pub fn set_session(&mut self, session: &Session) {
        self.session = Some(StoredSession {
            uid: session.uid.clone(),
            email: session.email.clone(),
            display_name: session.display_name.clone(),
            id_token: StoredToken::new(session.id_token.clone(), session.expires_in),
            refresh_token: session.refresh_token.clone(),
        });
    }

    pub fn get_session(&self) -> Option<StoredSession> {
        self.session.clone()
    }

    pub fn clear_session(&mut self) {
        self.session = None;
    }
}
