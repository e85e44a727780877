//! Fixed window rate limiter.
//!
//! Counts requests inside a window of fixed duration; the counter
//! resets when a new window opens.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::RateLimiter;

/// Fixed-window counter limiter.
pub struct FixedWindow {
    limit: i64,
    window: Duration,
    state: Mutex<WindowState>,
}

struct WindowState {
    count: i64,
    window_start: Instant,
}

impl FixedWindow {
    pub fn new(limit: i64, window: Duration) -> Self {
        Self {
            limit: limit.max(0),
            window,
            state: Mutex::new(WindowState {
                count: 0,
                window_start: Instant::now(),
            }),
        }
    }

    fn roll_window(&self, state: &mut WindowState, now: Instant) {
        if now.duration_since(state.window_start) > self.window {
            state.count = 0;
            state.window_start = now;
        }
    }
}

impl RateLimiter for FixedWindow {
    fn allow(&self) -> bool {
        let mut state = self.state.lock();
        self.roll_window(&mut state, Instant::now());
        if state.count >= self.limit {
            return false;
        }
        state.count += 1;
        true
    }

    fn remaining(&self) -> i64 {
        let mut state = self.state.lock();
        self.roll_window(&mut state, Instant::now());
        (self.limit - state.count).max(0)
    }

    fn reset(&self) {
        let mut state = self.state.lock();
        state.count = 0;
        state.window_start = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit() {
        let limiter = FixedWindow::new(3, Duration::from_secs(10));
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());
        assert_eq!(limiter.remaining(), 0);
    }

    #[test]
    fn window_rolls_over() {
        let limiter = FixedWindow::new(1, Duration::from_millis(10));
        assert!(limiter.allow());
        assert!(!limiter.allow());

        std::thread::sleep(Duration::from_millis(20));
        assert!(limiter.allow());
    }

    #[test]
    fn reset_clears_count() {
        let limiter = FixedWindow::new(2, Duration::from_secs(10));
        limiter.allow();
        limiter.allow();
        assert!(!limiter.allow());

        limiter.reset();
        assert!(limiter.allow());
    }

    #[test]
    fn zero_limit_rejects_everything() {
        let limiter = FixedWindow::new(0, Duration::from_secs(1));
        assert!(!limiter.allow());
    }
}
