//! Quota configuration for admission control.
//!
//! A `Quota` is the `(rate, burst)` pair applied to a single key: `rate` tokens
//! are added per second, up to `burst` tokens may be held at once.
//!
//! # Examples
//!
//! ```ignore
//! use skp_throttle::Quota;
//!
//! // 100 requests per second, bursts of up to 200
//! let quota = Quota::new(100, 200);
//!
//! // 10 requests per second, burst equal to the rate
//! let quota = Quota::per_second(10);
//!
//! // No limit at all
//! let quota = Quota::unlimited();
//! ```
//!
//! Non-positive values are never rejected. They are normalized by
//! [`Quota::normalize`] into one of three effective limits.

use serde::{Deserialize, Serialize};

/// Rate limiting quota for one key.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quota {
    /// Tokens added per second.
    rate: f64,

    /// Maximum tokens held at once.
    burst: u32,
}

/// The limit a quota resolves to once edge cases are normalized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EffectiveLimit {
    /// Both rate and burst are non-positive: admit everything, emit no quota headers.
    Unlimited,
    /// Positive rate but zero burst: the key can never be admitted.
    Blocked,
    /// A regular token bucket.
    Limited {
        /// Tokens per second, at least 1.
        rate: f64,
        /// Bucket capacity, at least 1.
        capacity: u32,
    },
}

/// Smallest rate a limited bucket may run at, in tokens per second.
pub const MIN_RATE: f64 = 1.0;

impl Quota {
    /// Create a quota with the given rate (tokens per second) and burst.
    pub fn new(rate: impl Into<f64>, burst: u32) -> Self {
        Self {
            rate: rate.into(),
            burst,
        }
    }

    /// Create a quota allowing `n` requests per second with a burst of `n`.
    pub fn per_second(n: u32) -> Self {
        Self::new(n, n)
    }

    /// A quota that never limits.
    pub fn unlimited() -> Self {
        Self::new(0, 0)
    }

    /// Set the burst size.
    pub fn with_burst(mut self, burst: u32) -> Self {
        self.burst = burst;
        self
    }

    /// Get the configured rate.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Get the configured burst.
    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// Resolve the configured values into the limit a bucket should enforce.
    ///
    /// - rate <= 0 and burst == 0: [`EffectiveLimit::Unlimited`]
    /// - burst == 0 otherwise: [`EffectiveLimit::Blocked`]
    /// - rate <= 0 with a positive burst: rate is raised to [`MIN_RATE`]
    ///
    /// A NaN rate counts as non-positive.
    pub fn normalize(&self) -> EffectiveLimit {
        let rate_positive = self.rate > 0.0;

        if !rate_positive && self.burst == 0 {
            return EffectiveLimit::Unlimited;
        }
        if self.burst == 0 {
            return EffectiveLimit::Blocked;
        }

        EffectiveLimit::Limited {
            rate: if rate_positive { self.rate } else { MIN_RATE },
            capacity: self.burst,
        }
    }
}

impl Default for Quota {
    fn default() -> Self {
        Self::new(100, 200)
    }
}
