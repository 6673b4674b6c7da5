//! Ingest configuration stored in `~/.dailyos/ingest/config.json`.
//!
//! The account list is ordered; registration follows file order so the
//! first entry wins when two entries share an identity.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{AccountConfig, ProviderType};

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "DAILYOS_INGEST_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    #[serde(default)]
    pub providers: HashMap<ProviderType, ProviderConfig>,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollConfig {
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u32,
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    #[serde(default = "default_account_deadline_secs")]
    pub account_deadline_secs: u64,
    #[serde(default = "default_startup_delay_secs")]
    pub startup_delay_secs: u64,
}

fn default_interval_minutes() -> u32 {
    5
}

fn default_worker_pool_size() -> usize {
    4
}

fn default_account_deadline_secs() -> u64 {
    30
}

fn default_startup_delay_secs() -> u64 {
    10
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            worker_pool_size: default_worker_pool_size(),
            account_deadline_secs: default_account_deadline_secs(),
            startup_delay_secs: default_startup_delay_secs(),
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.interval_minutes) * 60)
    }

    pub fn account_deadline(&self) -> Duration {
        Duration::from_secs(self.account_deadline_secs)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }
}

/// How a provider type is configured, independent of how many of its
/// accounts registered successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderEnablement {
    /// Listed as enabled, or implied by at least one configured account.
    Enabled,
    /// Explicitly turned off.
    Disabled,
    /// Neither listed nor referenced by any account.
    Unconfigured,
}

impl Config {
    /// Resolve whether a provider type is enabled.
    ///
    /// An explicit `providers` entry wins. Otherwise a provider is enabled iff
    /// some account of that type is configured.
    pub fn provider_enablement(&self, provider: ProviderType) -> ProviderEnablement {
        match self.providers.get(&provider) {
            Some(p) if p.enabled => ProviderEnablement::Enabled,
            Some(_) => ProviderEnablement::Disabled,
            None if self.accounts.iter().any(|a| a.provider == provider) => {
                ProviderEnablement::Enabled
            }
            None => ProviderEnablement::Unconfigured,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll.worker_pool_size == 0 {
            return Err(ConfigError::Invalid {
                field: "poll.workerPoolSize",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.poll.account_deadline_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "poll.accountDeadlineSecs",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.poll.interval_minutes == 0 {
            return Err(ConfigError::Invalid {
                field: "poll.intervalMinutes",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.database_path {
            Some(p) => Ok(p.clone()),
            None => Ok(ingest_dir()?.join("tasks.db")),
        }
    }

    pub fn credentials_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.credentials_dir {
            Some(p) => Ok(p.clone()),
            None => Ok(ingest_dir()?.join("credentials")),
        }
    }
}

/// `~/.dailyos/ingest`
pub fn ingest_dir() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::HomeDirNotFound)?;
    Ok(home.join(".dailyos").join("ingest"))
}

/// Resolve the config path, honouring `DAILYOS_INGEST_CONFIG`.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    match std::env::var_os(CONFIG_PATH_ENV) {
        Some(p) if !p.is_empty() => Ok(PathBuf::from(p)),
        _ => Ok(ingest_dir()?.join("config.json")),
    }
}

/// Load configuration from the default location.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path()?)
}

/// Load and validate configuration from an explicit path.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: Config = serde_json::from_str(&content)?;
    config.validate()?;
    Ok(config)
}
