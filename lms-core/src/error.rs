//! Error types for LMS cache operations

use thiserror::Error;

/// Backing cache store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Cache store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Cache transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Serialization failed for key {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Deserialization failed for key {key}: {reason}")]
    Deserialization { key: String, reason: String },

    #[error("Cache store lock poisoned")]
    LockPoisoned,
}

/// Configuration errors. These are fatal at startup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown caching strategy: {driver}")]
    UnknownDriver { driver: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Caching strategy already installed: {installed}")]
    AlreadyInstalled { installed: String },

    #[error("No caching strategy installed")]
    NotInstalled,
}

/// Errors raised by caller-supplied fetch and persist callbacks.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallbackError {
    #[error("Fetch callback failed for {key}: {reason}")]
    FetchFailed { key: String, reason: String },

    #[error("Persist callback failed for {key}: {reason}")]
    PersistFailed { key: String, reason: String },
}

/// Master error type for the LMS cache layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LmsError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Callback error: {0}")]
    Callback(#[from] CallbackError),
}

impl LmsError {
    /// Shorthand for a fetch failure raised from caller code.
    pub fn fetch_failed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Callback(CallbackError::FetchFailed {
            key: key.into(),
            reason: reason.into(),
        })
    }

    /// Shorthand for a persist failure raised from caller code.
    pub fn persist_failed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Callback(CallbackError::PersistFailed {
            key: key.into(),
            reason: reason.into(),
        })
    }

    /// Returns true if this error originated in the backing store.
    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    /// Returns true if this error originated in a caller-supplied callback.
    pub fn is_callback(&self) -> bool {
        matches!(self, Self::Callback(_))
    }
}

/// Result type alias for LMS cache operations.
pub type LmsResult<T> = Result<T, LmsError>;

// =============================================================================
// TESTS
// =============================================================================
