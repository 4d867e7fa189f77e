//! Limiter settings loadable from application configuration.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::key::HasClientAddr;
use crate::limiter::{RateLimiter, RateLimiterBuilder};
use crate::quota::Quota;
use crate::storage::StoreRegistry;

/// Serializable limiter settings.
///
/// Every field has a default, so an empty object is a valid configuration.
///
/// ```ignore
/// let config: LimiterConfig = serde_json::from_str(r#"{"rate": 5, "burst": 10, "wait_timeout_ms": 250}"#)?;
/// let limiter = config.into_builder::<RequestInfo>()?.build()?;
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Tokens added per second.
    pub rate: f64,
    /// Bucket capacity.
    pub burst: u32,
    /// Bounded wait in milliseconds; zero rejects immediately.
    pub wait_timeout_ms: u64,
    /// Emit `X-RateLimit-*` headers.
    pub rate_limit_headers: bool,
    /// Emit the `Retry-After` header.
    pub retry_after_header: bool,
    /// Idle threshold for the default store in seconds; zero keeps the store default.
    pub default_store_idle_secs: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        let quota = Quota::default();
        Self {
            rate: quota.rate(),
            burst: quota.burst(),
            wait_timeout_ms: 0,
            rate_limit_headers: true,
            retry_after_header: true,
            default_store_idle_secs: 0,
        }
    }
}

impl LimiterConfig {
    /// The static quota described by this configuration.
    pub fn quota(&self) -> Quota {
        Quota::new(self.rate, self.burst)
    }

    /// The wait timeout.
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    /// Check that the values can be enforced.
    pub fn validate(&self) -> Result<()> {
        if !self.rate.is_finite() {
            return Err(ConfigError::InvalidQuota(format!("rate must be finite, got {}", self.rate)).into());
        }
        Ok(())
    }

    /// Convert into a builder bound to the process-wide registry.
    pub fn into_builder<R: HasClientAddr + 'static>(self) -> Result<RateLimiterBuilder<R>> {
        self.into_builder_in(StoreRegistry::global().clone())
    }

    /// Convert into a builder bound to `registry`.
    ///
    /// A non-zero idle threshold is applied to the registry's default store.
    pub fn into_builder_in<R: HasClientAddr + 'static>(
        self,
        registry: Arc<StoreRegistry>,
    ) -> Result<RateLimiterBuilder<R>> {
        self.validate()?;

        if self.default_store_idle_secs > 0 {
            registry.set_default_idle(Duration::from_secs(self.default_store_idle_secs));
        }

        Ok(RateLimiter::builder(self.quota())
            .wait(self.wait_timeout())
            .headers(self.rate_limit_headers, self.retry_after_header)
            .registry(registry))
    }
}
