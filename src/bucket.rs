//! Token bucket primitive.
//!
//! Tokens are refilled continuously at `rate` per second up to `capacity`.
//! Each admission consumes one token. The refill is computed lazily from the
//! elapsed time on every observation, so a bucket costs nothing while idle.
//!
//! All state lives behind one lock: rate, capacity and token count are always
//! read and written together, so a concurrent limit update can never be
//! observed half-applied.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::{Result, ThrottleError};

/// Capacity used for unlimited buckets.
pub const UNLIMITED_CAPACITY: u32 = 1_000_000;

/// A token bucket shared by every request for one key.
#[derive(Debug)]
pub struct Bucket {
    state: Mutex<BucketState>,
}

/// A consistent view of a bucket at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketSnapshot {
    /// Tokens per second (`f64::INFINITY` when unlimited).
    pub rate: f64,
    /// Maximum tokens held.
    pub capacity: u32,
    /// Tokens available right now, in `[0, capacity]`.
    pub tokens: f64,
}

impl BucketSnapshot {
    /// Whether the bucket admits everything.
    pub fn is_unlimited(&self) -> bool {
        self.rate.is_infinite()
    }
}

#[derive(Debug, Clone, Copy)]
struct BucketState {
    rate: f64,
    capacity: u32,
    tokens: f64,
    last: Instant,
}

impl BucketState {
    fn is_unlimited(&self) -> bool {
        self.rate.is_infinite()
    }

    /// Bring the token count up to `now`.
    fn advance(&mut self, now: Instant) {
        let capacity = self.capacity as f64;
        if self.is_unlimited() {
            self.tokens = capacity;
        } else if now > self.last && self.rate > 0.0 {
            let elapsed = now.duration_since(self.last).as_secs_f64();
            self.tokens = (self.tokens + elapsed * self.rate).min(capacity);
        }
        if now > self.last {
            self.last = now;
        }
        self.tokens = self.tokens.clamp(0.0, capacity);
    }

    fn take(&mut self) -> bool {
        if self.is_unlimited() {
            return true;
        }
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Time until one token is available, `None` if it never will be.
    fn delay_for_one(&self) -> Option<Duration> {
        if self.is_unlimited() {
            return Some(Duration::ZERO);
        }
        if self.capacity == 0 || self.rate <= 0.0 || self.rate.is_nan() {
            return None;
        }
        if self.tokens >= 1.0 {
            return Some(Duration::ZERO);
        }
        let secs = (1.0 - self.tokens) / self.rate;
        // Round up so that sleeping for the delay always yields the token.
        Some(Duration::from_nanos((secs * 1e9).ceil() as u64))
    }

    fn snapshot(&self) -> BucketSnapshot {
        BucketSnapshot {
            rate: self.rate,
            capacity: self.capacity,
            tokens: self.tokens,
        }
    }
}

impl Bucket {
    /// Create a full bucket with the given rate (tokens per second) and capacity.
    pub fn new(rate: f64, capacity: u32) -> Self {
        Self {
            state: Mutex::new(BucketState {
                rate,
                capacity,
                tokens: capacity as f64,
                last: Instant::now(),
            }),
        }
    }

    /// Create a bucket that admits everything.
    pub fn unlimited() -> Self {
        Self::new(f64::INFINITY, UNLIMITED_CAPACITY)
    }

    /// Try to take one token without waiting.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        state.advance(Instant::now());
        state.take()
    }

    /// How long until a token would be available, without consuming anything.
    ///
    /// Returns `None` when no amount of waiting can yield a token.
    pub fn preview_delay(&self) -> Option<Duration> {
        let mut state = self.state.lock();
        state.advance(Instant::now());
        state.delay_for_one()
    }

    /// Wait for a token, giving up at `deadline`.
    ///
    /// Fails immediately, without sleeping, if the token cannot arrive before
    /// the deadline. A token is only ever taken at the moment this returns
    /// `Ok`, so dropping the future at any await point consumes nothing.
    pub async fn acquire_blocking(&self, deadline: Instant) -> Result<()> {
        let started = Instant::now();

        loop {
            let now = Instant::now();
            let delay = {
                let mut state = self.state.lock();
                state.advance(now);
                if state.take() {
                    return Ok(());
                }
                state.delay_for_one().ok_or(ThrottleError::Unobtainable)?
            };

            let ready_at = match now.checked_add(delay) {
                Some(at) if at <= deadline => at,
                _ => {
                    return Err(ThrottleError::WaitTimeout {
                        waited: now.saturating_duration_since(started),
                        timeout: deadline.saturating_duration_since(started),
                    });
                }
            };

            tokio::time::sleep_until(ready_at).await;
        }
    }

    /// Change the refill rate. Tokens accrued so far are kept.
    pub fn set_rate(&self, rate: f64) {
        let mut state = self.state.lock();
        state.advance(Instant::now());
        state.rate = rate;
    }

    /// Change the capacity. Tokens are kept, clamped to the new capacity.
    pub fn set_capacity(&self, capacity: u32) {
        let mut state = self.state.lock();
        state.advance(Instant::now());
        state.capacity = capacity;
        state.tokens = state.tokens.min(capacity as f64);
    }

    /// Apply a new rate and capacity as one step.
    ///
    /// Returns `true` if anything changed.
    pub fn update_limits(&self, rate: f64, capacity: u32) -> bool {
        let mut state = self.state.lock();
        if state.rate == rate && state.capacity == capacity {
            return false;
        }
        state.advance(Instant::now());
        state.rate = rate;
        state.capacity = capacity;
        state.tokens = state.tokens.min(capacity as f64);
        true
    }

    /// Tokens available right now.
    pub fn available_tokens(&self) -> f64 {
        self.snapshot().tokens
    }

    /// Current rate.
    pub fn rate(&self) -> f64 {
        self.state.lock().rate
    }

    /// Current capacity.
    pub fn capacity(&self) -> u32 {
        self.state.lock().capacity
    }

    /// Whether the bucket admits everything.
    pub fn is_unlimited(&self) -> bool {
        self.state.lock().is_unlimited()
    }

    /// Rate, capacity and tokens observed together.
    pub fn snapshot(&self) -> BucketSnapshot {
        let mut state = *self.state.lock();
        state.advance(Instant::now());
        state.snapshot()
    }
}
