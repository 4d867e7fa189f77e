//! Error types for admission control.
//!
//! Nothing in this module is surfaced to clients. The limiter resolves every
//! per-request failure to either an admission or a denial; these errors only
//! escape from construction-time APIs (building a limiter, creating a store).

use std::time::Duration;
use thiserror::Error;

/// Result type for throttling operations.
pub type Result<T> = std::result::Result<T, ThrottleError>;

/// Main error type for throttling operations.
#[derive(Debug, Error)]
pub enum ThrottleError {
    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A bounded wait could not obtain a token before its deadline.
    #[error("Wait timed out after {waited:?} (timeout {timeout:?})")]
    WaitTimeout {
        /// How long the caller actually waited.
        waited: Duration,
        /// The configured wait budget.
        timeout: Duration,
    },

    /// The bucket can never yield a token under its current limits.
    #[error("Bucket cannot yield a token under its current limits")]
    Unobtainable,
}

/// Store-related errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The reclamation task could not be started.
    #[error("No async runtime available to host the reclamation task")]
    NoRuntime,

    /// No default store can be built and none was supplied.
    #[error("No default store available; supply one with `store()`")]
    NoDefault,

    /// A store failed to release its resources.
    #[error("Store close failed: {0}")]
    CloseFailed(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A numeric limit could not be represented.
    #[error("Invalid quota: {0}")]
    InvalidQuota(String),

    /// Missing required configuration.
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

impl ThrottleError {
    /// Check whether this error came from an expired bounded wait.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::WaitTimeout { .. })
    }
}
