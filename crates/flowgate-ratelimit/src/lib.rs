//! flowgate-ratelimit — local rate limiting for admission decisions.
//!
//! The node agent consults a limiter inside its admission critical
//! section, so the contract is a single non-blocking `allow()` call.
//! Token-bucket and fixed-window implementations cover the two
//! configured rate-control methods; `Unlimited` backs profiles with
//! rate control disabled.

mod backoff;
mod fixed_window;
mod token_bucket;

pub use backoff::*;
pub use fixed_window::*;
pub use token_bucket::*;

use flowgate_types::{ProfileConfig, RateControlMethod};

/// Single-method contract consumed by the admission path.
pub trait RateLimiter: Send + Sync {
    /// Returns `true` if the request may proceed, consuming one permit.
    fn allow(&self) -> bool;

    /// Permits left in the current window.
    fn remaining(&self) -> i64;

    /// Restore a full window.
    fn reset(&self);
}

/// Pass-through limiter for profiles with rate control disabled.
#[derive(Debug, Default)]
pub struct Unlimited;

impl RateLimiter for Unlimited {
    fn allow(&self) -> bool {
        true
    }

    fn remaining(&self) -> i64 {
        i64::MAX
    }

    fn reset(&self) {}
}

/// Build the limiter matching a profile's configured method.
pub fn limiter_for(config: &ProfileConfig) -> Box<dyn RateLimiter> {
    match config.rate_control_method {
        RateControlMethod::None => Box::new(Unlimited),
        RateControlMethod::TokenBucket => {
            Box::new(TokenBucket::new(config.rate_limit, config.burst))
        }
        RateControlMethod::FixedWindow => {
            Box::new(FixedWindow::new(config.rate_limit, config.window))
        }
    }
}
