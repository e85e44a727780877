//! Token bucket rate limiter.
//!
//! Tokens accrue continuously at the configured rate up to the burst
//! capacity; each admitted request consumes one token.

use std::time::Instant;

use parking_lot::Mutex;

use crate::RateLimiter;

/// Token bucket with burst support.
pub struct TokenBucket {
    /// Bucket capacity (maximum instantaneous tokens).
    capacity: i64,
    /// Tokens credited per second.
    rate_per_sec: i64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: i64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a bucket that starts full.
    pub fn new(rate_per_sec: i64, burst: i64) -> Self {
        let capacity = burst.max(1);
        Self {
            capacity,
            rate_per_sec: rate_per_sec.max(0),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.duration_since(state.last_refill);
        let credit = (elapsed.as_secs_f64() * self.rate_per_sec as f64).floor() as i64;
        if credit > 0 {
            state.tokens = (state.tokens + credit).min(self.capacity);
            state.last_refill = now;
        }
    }
}

impl RateLimiter for TokenBucket {
    fn allow(&self) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state, Instant::now());
        if state.tokens < 1 {
            return false;
        }
        state.tokens -= 1;
        true
    }

    fn remaining(&self) -> i64 {
        let mut state = self.state.lock();
        self.refill(&mut state, Instant::now());
        state.tokens
    }

    fn reset(&self) {
        let mut state = self.state.lock();
        state.tokens = self.capacity;
        state.last_refill = Instant::now();
    }
}
