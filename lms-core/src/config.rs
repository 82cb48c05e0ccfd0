//! Configuration types

use crate::{ConfigError, LmsError, LmsResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default cache entry TTL in seconds (1 hour).
pub const DEFAULT_TTL_SECS: u64 = 3600;

/// Default cache key prefix.
pub const DEFAULT_PREFIX: &str = "lms";

/// Environment variable selecting the strategy driver.
pub const ENV_DRIVER: &str = "LMS_CACHE_STRATEGY";

/// Environment variable holding the TTL in seconds.
pub const ENV_TTL: &str = "LMS_CACHE_TTL";

/// Environment variable holding the key prefix.
pub const ENV_PREFIX: &str = "LMS_CACHE_PREFIX";

/// Which cache-consistency strategy the process runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// Application checks and populates the cache itself; writes only touch the cache.
    #[default]
    CacheAside,
    /// Cache populates itself on miss; writes invalidate.
    ReadThrough,
    /// Writes go to the system of record and the cache synchronously.
    WriteThrough,
    /// Baseline that never touches the cache.
    NoCache,
}

impl StrategyKind {
    /// All supported drivers, in configuration order.
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::CacheAside,
        StrategyKind::ReadThrough,
        StrategyKind::WriteThrough,
        StrategyKind::NoCache,
    ];

    /// The configuration name of this driver.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CacheAside => "cache-aside",
            Self::ReadThrough => "read-through",
            Self::WriteThrough => "write-through",
            Self::NoCache => "no-cache",
        }
    }

    /// Short operator-facing description of the protocol.
    pub fn description(&self) -> &'static str {
        match self {
            Self::CacheAside => "Application explicitly manages cache (lazy loading)",
            Self::ReadThrough => "Cache layer handles DB reads transparently",
            Self::WriteThrough => "Synchronous write to both cache and database",
            Self::NoCache => "Bypasses the cache entirely (baseline for comparison)",
        }
    }

    /// Returns true if this driver ever reads from or writes to the backing store.
    pub fn uses_cache(&self) -> bool {
        !matches!(self, Self::NoCache)
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s.trim())
            .ok_or_else(|| ConfigError::UnknownDriver {
                driver: s.to_string(),
            })
    }
}

/// Process-wide cache strategy configuration.
///
/// Read once at startup; the selected strategy keeps its own copy and the
/// values never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStrategyConfig {
    /// Which strategy to instantiate.
    pub driver: StrategyKind,
    /// TTL for cached entries, in seconds.
    pub ttl_secs: u64,
    /// Prefix prepended to every cache key.
    pub prefix: String,
}

impl Default for CacheStrategyConfig {
    fn default() -> Self {
        Self {
            driver: StrategyKind::default(),
            ttl_secs: DEFAULT_TTL_SECS,
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }
}

impl CacheStrategyConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the driver.
    pub fn with_driver(mut self, driver: StrategyKind) -> Self {
        self.driver = driver;
        self
    }

    /// Set the TTL in seconds.
    pub fn with_ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    /// Set the key prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// TTL as a [`Duration`].
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - ttl_secs > 0
    /// - prefix is non-empty and contains no whitespace, since it is
    ///   embedded verbatim at the front of every cache key
    pub fn validate(&self) -> LmsResult<()> {
        if self.ttl_secs == 0 {
            return Err(LmsError::Config(ConfigError::InvalidValue {
                field: "ttl".to_string(),
                value: self.ttl_secs.to_string(),
                reason: "ttl must be a positive number of seconds".to_string(),
            }));
        }

        if self.prefix.is_empty() {
            return Err(LmsError::Config(ConfigError::InvalidValue {
                field: "prefix".to_string(),
                value: self.prefix.clone(),
                reason: "prefix must not be empty".to_string(),
            }));
        }

        if self.prefix.chars().any(char::is_whitespace) {
            return Err(LmsError::Config(ConfigError::InvalidValue {
                field: "prefix".to_string(),
                value: self.prefix.clone(),
                reason: "prefix must not contain whitespace".to_string(),
            }));
        }

        Ok(())
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `LMS_CACHE_STRATEGY`: driver name (default: cache-aside)
    /// - `LMS_CACHE_TTL`: TTL in seconds (default: 3600)
    /// - `LMS_CACHE_PREFIX`: key prefix (default: lms)
    ///
    /// Unlike missing variables, malformed ones are an error: an unknown
    /// driver or unparsable TTL must stop the process at startup.
    pub fn from_env() -> LmsResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reads values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> LmsResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let driver = match lookup(ENV_DRIVER) {
            Some(raw) => raw.parse::<StrategyKind>()?,
            None => defaults.driver,
        };

        let ttl_secs = match lookup(ENV_TTL) {
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| {
                LmsError::Config(ConfigError::InvalidValue {
                    field: "ttl".to_string(),
                    value: raw.clone(),
                    reason: e.to_string(),
                })
            })?,
            None => defaults.ttl_secs,
        };

        let prefix = lookup(ENV_PREFIX).unwrap_or(defaults.prefix);

        let config = Self {
            driver,
            ttl_secs,
            prefix,
        };
        config.validate()?;
        Ok(config)
    }
}
