//! Configuration management.
//!
//! `Config` is the user-facing file stored at
//! `~/.config/sessionward/config.json`; `SessionConfig` is the subset the
//! core service needs, validated before the service is built.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::metrics::DEFAULT_METRICS_LOG_CAPACITY;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "sessionward";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Refresh calls fail fast; a timeout resolves as a transient failure.
const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 10;

/// Broadcast capacity for session events
const DEFAULT_EVENT_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceMode {
    None,
    #[default]
    File,
    Keyring,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub identity_base_url: Option<String>,
    pub request_timeout_secs: u64,
    pub refresh_timeout_secs: u64,
    pub persistence: PersistenceMode,
    /// Encrypt the session file (passphrase from `SESSIONWARD_PASSPHRASE`)
    pub encrypt_session_file: bool,
    pub event_channel_capacity: usize,
    /// Recent security events kept in memory
    pub metrics_log_capacity: usize,
    pub last_username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            identity_base_url: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            refresh_timeout_secs: DEFAULT_REFRESH_TIMEOUT_SECS,
            persistence: PersistenceMode::default(),
            encrypt_session_file: false,
            event_channel_capacity: DEFAULT_EVENT_CAPACITY,
            metrics_log_capacity: DEFAULT_METRICS_LOG_CAPACITY,
            last_username: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
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

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn session_config(&self) -> SessionConfig {
        let refresh_timeout = Duration::from_secs(self.refresh_timeout_secs);
        SessionConfig {
            refresh_timeout,
            validation_timeout: self.request_timeout(),
            revoke_timeout: refresh_timeout,
            event_channel_capacity: self.event_channel_capacity,
            metrics_log_capacity: self.metrics_log_capacity,
        }
    }
}

/// Tunables for [`crate::SessionService`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Upper bound for one refresh network call
    pub refresh_timeout: Duration,
    /// Upper bound for a remote session validation
    pub validation_timeout: Duration,
    /// Upper bound for the best-effort revoke during signout
    pub revoke_timeout: Duration,
    pub event_channel_capacity: usize,
    /// Bound on retained security events; totals are kept regardless
    pub metrics_log_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Config::default().session_config()
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.refresh_timeout.is_zero() {
            return Err(SessionError::Configuration("refresh timeout must be non-zero".into()));
        }
        if self.validation_timeout.is_zero() {
            return Err(SessionError::Configuration(
                "validation timeout must be non-zero".into(),
            ));
        }
        if self.revoke_timeout.is_zero() {
            return Err(SessionError::Configuration("revoke timeout must be non-zero".into()));
        }
        if self.event_channel_capacity == 0 {
            return Err(SessionError::Configuration(
                "event channel capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
