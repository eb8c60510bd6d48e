//! Configuration management for the throttle.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ThrottleError};
use crate::ratelimit::{
    InMemoryStore, KvLayout, KvStore, MemoryKv, Rate, Store, RATE_PREFIX, STAT_PREFIX,
};

/// Environment variable prefix for [`ThrottleConfig::load`].
pub const ENV_PREFIX: &str = "THROTTLE";

/// Longest accepted rate window, in seconds (one year).
pub const MAX_WINDOW_SECS: u64 = 365 * 24 * 3600;
/// Longest accepted record time-to-live, in seconds (one year).
pub const MAX_TTL_SECS: u64 = 365 * 24 * 3600;
/// Longest accepted startup seeding bound, in seconds.
pub const MAX_SEED_TIMEOUT_SECS: u64 = 3600;

/// Main configuration for the throttle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Rate applied to keys without their own configuration
    #[serde(default)]
    pub default_rate: RateConfig,

    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Upper bound on seeding the default rate at startup, in seconds
    #[serde(default = "default_seed_timeout")]
    pub seed_timeout_secs: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            default_rate: RateConfig::default(),
            storage: StorageConfig::default(),
            seed_timeout_secs: default_seed_timeout(),
        }
    }
}

/// A rate as written in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateConfig {
    /// Maximum admitted hits per window
    #[serde(default = "default_max_request")]
    pub max_request: u64,

    /// Window length in seconds
    #[serde(default = "default_window")]
    pub window_secs: u64,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            max_request: default_max_request(),
            window_secs: default_window(),
        }
    }
}

impl From<&RateConfig> for Rate {
    fn from(config: &RateConfig) -> Self {
        Rate::new(config.max_request, Duration::from_secs(config.window_secs))
    }
}

fn default_max_request() -> u64 {
    60
}

fn default_window() -> u64 {
    60
}

fn default_seed_timeout() -> u64 {
    30
}

/// Which store backs the rate limiter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local maps; counts are not shared between instances
    #[default]
    Memory,
    /// JSON records with expiry in a key-value store
    Kv,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Prefix of stat records (kv backend)
    #[serde(default = "default_stat_prefix")]
    pub stat_prefix: String,

    /// Prefix of rate records (kv backend)
    #[serde(default = "default_rate_prefix")]
    pub rate_prefix: String,

    /// Stat record time-to-live in seconds (kv backend)
    #[serde(default = "default_ttl")]
    pub stat_ttl_secs: u64,

    /// Rate record time-to-live in seconds (kv backend)
    #[serde(default = "default_ttl")]
    pub rate_ttl_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            stat_prefix: default_stat_prefix(),
            rate_prefix: default_rate_prefix(),
            stat_ttl_secs: default_ttl(),
            rate_ttl_secs: default_ttl(),
        }
    }
}

fn default_stat_prefix() -> String {
    STAT_PREFIX.to_string()
}

fn default_rate_prefix() -> String {
    RATE_PREFIX.to_string()
}

fn default_ttl() -> u64 {
    300
}

impl StorageConfig {
    /// Record layout for the kv backend.
    pub fn layout(&self) -> KvLayout {
        KvLayout {
            stat_prefix: self.stat_prefix.clone(),
            rate_prefix: self.rate_prefix.clone(),
            stat_ttl: Duration::from_secs(self.stat_ttl_secs),
            rate_ttl: Duration::from_secs(self.rate_ttl_secs),
        }
    }

    /// Build the configured store.
    pub fn build_store(&self) -> Arc<dyn Store> {
        match self.backend {
            StorageBackend::Memory => Arc::new(InMemoryStore::new()),
            StorageBackend::Kv => Arc::new(KvStore::with_layout(MemoryKv::new(), self.layout())),
        }
    }
}

impl ThrottleConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ThrottleConfig = serde_yaml::from_str(yaml)
            .map_err(|e| ThrottleError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file overlaid with `THROTTLE__*`
    /// environment variables (e.g. `THROTTLE__DEFAULT_RATE__MAX_REQUEST=10`).
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::with_name(path));
        }

        let config: ThrottleConfig = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ThrottleError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the limiter cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.default_rate.max_request == 0 {
            return Err(ThrottleError::Config(
                "default_rate.max_request must be positive".to_string(),
            ));
        }
        check_range(
            "default_rate.window_secs",
            self.default_rate.window_secs,
            MAX_WINDOW_SECS,
        )?;
        check_range("storage.stat_ttl_secs", self.storage.stat_ttl_secs, MAX_TTL_SECS)?;
        check_range("storage.rate_ttl_secs", self.storage.rate_ttl_secs, MAX_TTL_SECS)?;
        check_range(
            "seed_timeout_secs",
            self.seed_timeout_secs,
            MAX_SEED_TIMEOUT_SECS,
        )?;
        Ok(())
    }

    /// The default rate as used by the limiter.
    pub fn default_rate(&self) -> Rate {
        Rate::from(&self.default_rate)
    }

    pub fn seed_timeout(&self) -> Duration {
        Duration::from_secs(self.seed_timeout_secs)
    }
}

fn check_range(name: &str, value: u64, max: u64) -> Result<()> {
    if value == 0 || value > max {
        return Err(ThrottleError::Config(format!(
            "{name} must be between 1 and {max}, got {value}"
        )));
    }
    Ok(())
}
