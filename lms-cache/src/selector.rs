//! Strategy selection and the process-wide strategy slot.
//!
//! The driver is resolved once, from configuration, when the process starts.
//! The chosen strategy is installed into a single slot and shared by every
//! task for the life of the process. Replacing it at runtime is not
//! supported.

use std::sync::Arc;

use lms_core::{CacheStrategyConfig, ConfigError, LmsResult, StrategyKind};
use once_cell::sync::OnceCell;
use tracing::info;

use crate::store::CacheStore;
use crate::strategy::{
    CacheAsideStrategy, CacheStrategy, NoCacheStrategy, ReadThroughStrategy, WriteThroughStrategy,
};

static INSTALLED: OnceCell<Arc<dyn CacheStrategy>> = OnceCell::new();

/// Builds strategies from configuration and owns the shared instance.
pub struct StrategySelector;

impl StrategySelector {
    /// Build the strategy named by `config.driver` over `store`.
    ///
    /// The configuration is validated first. No-Cache never touches `store`.
    pub fn build(
        config: CacheStrategyConfig,
        store: Arc<dyn CacheStore>,
    ) -> LmsResult<Arc<dyn CacheStrategy>> {
        config.validate()?;

        let strategy: Arc<dyn CacheStrategy> = match config.driver {
            StrategyKind::CacheAside => Arc::new(CacheAsideStrategy::new(config, store)),
            StrategyKind::ReadThrough => Arc::new(ReadThroughStrategy::new(config, store)),
            StrategyKind::WriteThrough => Arc::new(WriteThroughStrategy::new(config, store)),
            StrategyKind::NoCache => Arc::new(NoCacheStrategy::new(config)),
        };
        Ok(strategy)
    }

    /// Install `strategy` as the process-wide instance.
    ///
    /// Fails with [`ConfigError::AlreadyInstalled`] if one is already set.
    pub fn install(strategy: Arc<dyn CacheStrategy>) -> LmsResult<Arc<dyn CacheStrategy>> {
        let kind = strategy.kind();
        let ttl_secs = strategy.config().ttl_secs;
        let prefix = strategy.config().prefix.clone();

        INSTALLED.set(strategy).map_err(|_| ConfigError::AlreadyInstalled {
            installed: INSTALLED
                .get()
                .map(|s| s.kind().to_string())
                .unwrap_or_default(),
        })?;

        info!(strategy = %kind, ttl_secs, prefix = %prefix, "caching strategy installed");
        Self::current()
    }

    /// Build from `config` and install the result.
    pub fn init(
        config: CacheStrategyConfig,
        store: Arc<dyn CacheStore>,
    ) -> LmsResult<Arc<dyn CacheStrategy>> {
        Self::install(Self::build(config, store)?)
    }

    /// Read the configuration from `LMS_CACHE_*` variables, then build and
    /// install.
    pub fn init_from_env(store: Arc<dyn CacheStore>) -> LmsResult<Arc<dyn CacheStrategy>> {
        Self::init(CacheStrategyConfig::from_env()?, store)
    }

    /// The installed strategy.
    pub fn current() -> LmsResult<Arc<dyn CacheStrategy>> {
        INSTALLED
            .get()
            .cloned()
            .ok_or_else(|| ConfigError::NotInstalled.into())
    }

    pub fn is_installed() -> bool {
        INSTALLED.get().is_some()
    }
}
