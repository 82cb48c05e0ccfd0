//! LMS Core - Errors and Configuration
//!
//! Shared vocabulary for the cache-consistency layer: the error taxonomy
//! every crate reports through, and the process-wide strategy configuration
//! read once at startup. No cache behavior lives here.

mod config;
mod error;

pub use config::{
    CacheStrategyConfig, StrategyKind, DEFAULT_PREFIX, DEFAULT_TTL_SECS, ENV_DRIVER, ENV_PREFIX,
    ENV_TTL,
};
pub use error::{CallbackError, ConfigError, LmsError, LmsResult, StoreError};
