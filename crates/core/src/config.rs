use serde::Deserialize;
use std::time::Duration;

use crate::error::{TavernError, TavernResult};

/// Root application configuration. Loaded from environment variables
/// with the prefix `TAVERN__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
}

/// Volatile tier connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Address of the volatile tier. There is no default: a service that
    /// needs the tier refuses to start without one.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,
    /// After a failed connect, callers skip the tier for this long.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_profile_ttl_secs")]
    pub profile_ttl_secs: u64,
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_max_history_len")]
    pub max_history_len: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweeperConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
}

// Default functions
fn default_connect_timeout_ms() -> u64 {
    2000
}
fn default_op_timeout_ms() -> u64 {
    500
}
fn default_retry_backoff_ms() -> u64 {
    1000
}
fn default_profile_ttl_secs() -> u64 {
    86_400
}
fn default_session_ttl_secs() -> u64 {
    3600
}
fn default_max_history_len() -> usize {
    20
}
fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            op_timeout_ms: default_op_timeout_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            profile_ttl_secs: default_profile_ttl_secs(),
            session_ttl_secs: default_session_ttl_secs(),
            max_history_len: default_max_history_len(),
        }
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig::default(),
            cache: CacheConfig::default(),
            sweeper: SweeperConfig::default(),
        }
    }
}

impl RedisConfig {
    /// The configured address, or a configuration error if none was given.
    pub fn require_url(&self) -> TavernResult<&str> {
        match self.url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => Ok(url),
            _ => Err(TavernError::Config(
                "volatile tier address (TAVERN__REDIS__URL) is not set".to_string(),
            )),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl CacheConfig {
    pub fn profile_ttl(&self) -> Duration {
        Duration::from_secs(self.profile_ttl_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

impl SweeperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("TAVERN")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Reject settings the service cannot start with.
    pub fn validate(&self) -> TavernResult<()> {
        self.redis.require_url()?;
        if self.redis.connect_timeout_ms == 0 || self.redis.op_timeout_ms == 0 {
            return Err(TavernError::Config(
                "volatile tier timeouts must be non-zero".to_string(),
            ));
        }
        if self.cache.profile_ttl_secs == 0 || self.cache.session_ttl_secs == 0 {
            return Err(TavernError::Config("cache TTLs must be non-zero".to_string()));
        }
        if self.cache.max_history_len == 0 {
            return Err(TavernError::Config(
                "max_history_len must be at least 1".to_string(),
            ));
        }
        if self.sweeper.interval_secs == 0 {
            return Err(TavernError::Config(
                "sweeper interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
