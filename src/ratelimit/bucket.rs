//! Token bucket implementation.

use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::trace;

use super::admission::{Admission, Decision};
use crate::error::{GateError, Result};

/// Seconds past the last refill advertised as the reset point.
const RESET_HINT_SECS: i64 = 1;

/// Mutable portion of the bucket, only touched under the lock.
#[derive(Debug)]
struct BucketState {
    /// Available permits, always within `0..=capacity`
    tokens: u64,
    /// Monotonic time of the last token-count update
    last_refill: Instant,
    /// Wall-clock time matching `last_refill`, used for the reset hint
    last_refill_wall: DateTime<Utc>,
}

/// Point-in-time view of a bucket, taken without consuming a permit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketSnapshot {
    pub capacity: u64,
    pub refill_rate: f64,
    pub tokens: u64,
    pub reset_at: i64,
}

/// A token bucket that admits or rejects requests.
///
/// Tokens are replenished lazily on every admission check: the elapsed
/// time since the previous check is multiplied by the refill rate and
/// truncated to a whole number of tokens. The refill timestamp is reset on
/// every check, so time shorter than `1 / refill_rate` between two checks
/// never turns into a token.
///
/// This struct is thread-safe and can be shared across multiple tasks.
#[derive(Debug)]
pub struct TokenBucket {
    /// Maximum number of tokens held
    capacity: u64,
    /// Tokens added per second
    refill_rate: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket.
    ///
    /// Fails if `capacity` is zero or `refill_rate` is not a positive,
    /// finite number.
    pub fn new(capacity: u64, refill_rate: f64) -> Result<Self> {
        if capacity == 0 {
            return Err(GateError::Config(
                "bucket capacity must be greater than zero".to_string(),
            ));
        }
        if !refill_rate.is_finite() || refill_rate <= 0.0 {
            return Err(GateError::Config(format!(
                "refill rate must be a positive number, got {}",
                refill_rate
            )));
        }

        Ok(Self {
            capacity,
            refill_rate,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
                last_refill_wall: Utc::now(),
            }),
        })
    }

    /// Get the bucket capacity.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Get the refill rate in tokens per second.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Read the current state without refilling or consuming.
    pub fn snapshot(&self) -> BucketSnapshot {
        let state = self.state.lock();
        BucketSnapshot {
            capacity: self.capacity,
            refill_rate: self.refill_rate,
            tokens: state.tokens,
            reset_at: reset_hint(state.last_refill_wall),
        }
    }

    /// Run an admission check as if it happened at `now`.
    #[cfg(test)]
    fn try_admit_at(&self, now: Instant, now_wall: DateTime<Utc>) -> Decision {
        let mut state = self.state.lock();
        self.decide(&mut state, now, now_wall)
    }

    fn decide(&self, state: &mut BucketState, now: Instant, now_wall: DateTime<Utc>) -> Decision {
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        // Float-to-int `as` truncates toward zero and saturates.
        let tokens_to_add = (elapsed * self.refill_rate) as u64;

        state.tokens = state.tokens.saturating_add(tokens_to_add).min(self.capacity);
        if now >= state.last_refill {
            state.last_refill = now;
            state.last_refill_wall = now_wall;
        }

        let admitted = state.tokens > 0;
        if admitted {
            state.tokens -= 1;
        }

        trace!(
            added = tokens_to_add,
            remaining = state.tokens,
            admitted = admitted,
            "Admission checked"
        );

        Decision {
            admitted,
            limit: self.capacity,
            remaining: state.tokens,
            reset_at: reset_hint(state.last_refill_wall),
        }
    }
}

impl Admission for TokenBucket {
    fn try_admit(&self) -> Decision {
        let mut state = self.state.lock();
        // Read the clock under the lock so refill times never go backwards.
        let (now, now_wall) = (Instant::now(), Utc::now());
        self.decide(&mut state, now, now_wall)
    }
}

fn reset_hint(last_refill: DateTime<Utc>) -> i64 {
    last_refill.timestamp() + RESET_HINT_SECS
}
