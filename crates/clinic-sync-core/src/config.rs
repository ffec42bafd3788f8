//! Sync configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Collection;
use crate::sync::CommitPolicy;

pub const ENV_BASE_URL: &str = "CLINIC_SYNC_BASE_URL";
pub const ENV_INTERVAL_SECS: &str = "CLINIC_SYNC_INTERVAL_SECS";
pub const ENV_TIMEOUT_SECS: &str = "CLINIC_SYNC_TIMEOUT_SECS";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration for the sync subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Remote API base, e.g. `https://clinic.example.com/api`
    pub base_url: String,
    /// Timer period while online
    pub sync_interval_secs: u64,
    /// Per-request network timeout
    pub request_timeout_secs: u64,
    /// Collections reconciled per cycle, in order
    pub collections: Vec<Collection>,
    pub commit_policy: CommitPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            sync_interval_secs: 30,
            request_timeout_secs: 30,
            collections: Collection::ALL.to_vec(),
            commit_policy: CommitPolicy::AllOrNothing,
        }
    }
}

impl SyncConfig {
    /// Parse from JSON; omitted keys take their defaults.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `CLINIC_SYNC_*` environment variables.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let mut config = Self::default();
        if let Some(url) = lookup(ENV_BASE_URL) {
            config.base_url = url;
        }
        if let Some(secs) = lookup(ENV_INTERVAL_SECS) {
            config.sync_interval_secs = parse_secs(ENV_INTERVAL_SECS, &secs)?;
        }
        if let Some(secs) = lookup(ENV_TIMEOUT_SECS) {
            config.request_timeout_secs = parse_secs(ENV_TIMEOUT_SECS, &secs)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(invalid("base_url", &self.base_url));
        }
        if self.sync_interval_secs == 0 {
            return Err(invalid("sync_interval_secs", "0"));
        }
        if self.request_timeout_secs == 0 {
            return Err(invalid("request_timeout_secs", "0"));
        }
        Ok(())
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_secs(key: &str, value: &str) -> ConfigResult<u64> {
    value.trim().parse().map_err(|_| invalid(key, value))
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}
