//! HTTP headers for admission feedback.
//!
//! Quota headers are always synthesized from a bucket's observed state, never
//! from configuration, so dynamically resolved limits are reported as they are
//! actually enforced.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::bucket::BucketSnapshot;

/// Standard rate limit header names.
pub mod names {
    /// Tokens added per second.
    pub const RATE_LIMIT_LIMIT: &str = "X-RateLimit-Limit";

    /// Whole tokens currently available.
    pub const RATE_LIMIT_REMAINING: &str = "X-RateLimit-Remaining";

    /// Unix time (seconds) at which the bucket is full again.
    pub const RATE_LIMIT_RESET: &str = "X-RateLimit-Reset";

    /// Seconds until the client should retry (standard HTTP header).
    pub const RETRY_AFTER: &str = "Retry-After";
}

/// Builder for rate limit headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitHeaders {
    limit: Option<u64>,
    remaining: Option<u64>,
    reset: Option<u64>,
    retry_after: Option<u64>,
}

impl RateLimitHeaders {
    /// Create a new header builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the quota headers describing a bucket's current state.
    ///
    /// Returns an empty set for unlimited buckets.
    pub fn from_snapshot(snapshot: &BucketSnapshot) -> Self {
        if snapshot.is_unlimited() {
            return Self::new();
        }

        let remaining = remaining_tokens(snapshot.tokens);
        Self::new()
            .limit(snapshot.rate.round() as u64)
            .remaining(remaining)
            .reset(reset_at(snapshot.capacity, remaining, snapshot.rate, SystemTime::now()))
    }

    /// Set the limit header.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the remaining header.
    pub fn remaining(mut self, remaining: u64) -> Self {
        self.remaining = Some(remaining);
        self
    }

    /// Set the reset header (Unix seconds).
    pub fn reset(mut self, reset_unix_secs: u64) -> Self {
        self.reset = Some(reset_unix_secs);
        self
    }

    /// Set the retry-after header (seconds until retry).
    pub fn retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    /// Get the limit value, if set.
    pub fn get_limit(&self) -> Option<u64> {
        self.limit
    }

    /// Get the remaining value, if set.
    pub fn get_remaining(&self) -> Option<u64> {
        self.remaining
    }

    /// Get the reset value, if set.
    pub fn get_reset(&self) -> Option<u64> {
        self.reset
    }

    /// Get the retry-after value, if set.
    pub fn get_retry_after(&self) -> Option<u64> {
        self.retry_after
    }

    /// Whether no header is set.
    pub fn is_empty(&self) -> bool {
        self.limit.is_none()
            && self.remaining.is_none()
            && self.reset.is_none()
            && self.retry_after.is_none()
    }

    /// Convert to a vector of (name, value) pairs.
    pub fn to_vec(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::new();

        if let Some(limit) = self.limit {
            headers.push((names::RATE_LIMIT_LIMIT, limit.to_string()));
        }
        if let Some(remaining) = self.remaining {
            headers.push((names::RATE_LIMIT_REMAINING, remaining.to_string()));
        }
        if let Some(reset) = self.reset {
            headers.push((names::RATE_LIMIT_RESET, reset.to_string()));
        }
        if let Some(retry_after) = self.retry_after {
            headers.push((names::RETRY_AFTER, retry_after.to_string()));
        }

        headers
    }
}

/// Whole tokens available: clamp to zero first, then floor.
pub fn remaining_tokens(tokens: f64) -> u64 {
    tokens.max(0.0).floor() as u64
}

/// Unix time (seconds) at which a bucket holding `remaining` tokens is full again.
///
/// A bucket that is already full reports one second from `now`. Refill times
/// too large to represent saturate to `u64::MAX`.
pub fn reset_at(capacity: u32, remaining: u64, rate: f64, now: SystemTime) -> u64 {
    let needed = (capacity as u64).saturating_sub(remaining);
    let until_full = if needed == 0 || rate <= 0.0 {
        Ok(Duration::from_secs(1))
    } else {
        Duration::try_from_secs_f64(needed as f64 / rate)
    };

    match until_full.ok().and_then(|d| now.checked_add(d)) {
        Some(at) => at.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs(),
        None => u64::MAX,
    }
}

/// Convert a previewed delay into a `Retry-After` value.
///
/// Rounds up to the next whole second with a floor of one second.
pub fn retry_after_secs(delay: Duration) -> u64 {
    let mut secs = delay.as_secs();
    if delay.subsec_nanos() > 0 {
        secs += 1;
    }
    secs.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_builder() {
        let headers = RateLimitHeaders::new()
            .limit(100)
            .remaining(50)
            .reset(1_700_000_030)
            .to_vec();

        assert_eq!(headers.len(), 3);
        assert!(headers.iter().any(|(k, v)| *k == "X-RateLimit-Limit" && v == "100"));
        assert!(headers.iter().any(|(k, v)| *k == "X-RateLimit-Remaining" && v == "50"));
        assert!(headers.iter().any(|(k, v)| *k == "X-RateLimit-Reset" && v == "1700000030"));
    }

    #[test]
    fn test_headers_with_retry_after() {
        let headers = RateLimitHeaders::new()
            .limit(100)
            .remaining(0)
            .retry_after(60)
            .to_vec();

        assert!(headers.iter().any(|(k, v)| *k == "Retry-After" && v == "60"));
    }

    #[test]
    fn test_unlimited_snapshot_has_no_headers() {
        let snapshot = BucketSnapshot {
            rate: f64::INFINITY,
            capacity: 1_000_000,
            tokens: 1_000_000.0,
        };
        assert!(RateLimitHeaders::from_snapshot(&snapshot).is_empty());
    }

    #[test]
    fn test_snapshot_headers() {
        let snapshot = BucketSnapshot {
            rate: 100.0,
            capacity: 200,
            tokens: 199.4,
        };
        let headers = RateLimitHeaders::from_snapshot(&snapshot);

        assert_eq!(headers.get_limit(), Some(100));
        assert_eq!(headers.get_remaining(), Some(199));
        assert!(headers.get_reset().is_some());
        assert_eq!(headers.get_retry_after(), None);
    }

    #[test]
    fn test_limit_is_rounded() {
        let snapshot = BucketSnapshot {
            rate: 2.6,
            capacity: 5,
            tokens: 5.0,
        };
        assert_eq!(RateLimitHeaders::from_snapshot(&snapshot).get_limit(), Some(3));
    }

    #[test]
    fn test_remaining_clamps_then_floors() {
        assert_eq!(remaining_tokens(-0.000_001), 0);
        assert_eq!(remaining_tokens(0.999), 0);
        assert_eq!(remaining_tokens(4.2), 4);
    }

    #[test]
    fn test_reset_full_bucket_is_one_second() {
        let now = UNIX_EPOCH + Duration::from_secs(1_000);
        assert_eq!(reset_at(10, 10, 5.0, now), 1_001);
    }

    #[test]
    fn test_reset_time_to_fill() {
        let now = UNIX_EPOCH + Duration::from_secs(1_000);
        // 6 tokens missing at 2 per second
        assert_eq!(reset_at(10, 4, 2.0, now), 1_003);
        // 1 token missing at 4 per second truncates to the current second
        assert_eq!(reset_at(10, 9, 4.0, now), 1_000);
    }

    #[test]
    fn test_reset_saturates_on_tiny_rate() {
        let now = UNIX_EPOCH + Duration::from_secs(1_000);
        assert_eq!(reset_at(2, 0, 1e-20, now), u64::MAX);
        assert_eq!(reset_at(u32::MAX, 0, f64::MIN_POSITIVE, now), u64::MAX);
    }

    #[test]
    fn test_retry_after_rounding() {
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(1)), 1);
        assert_eq!(retry_after_secs(Duration::from_secs(1)), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(1_001)), 2);
        assert_eq!(retry_after_secs(Duration::from_secs(3)), 3);
    }
}
