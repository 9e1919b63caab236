//! Sliding window strategy, approximated with two adjacent fixed windows.
//!
//! Instead of keeping a timestamp per message, each key keeps the count of
//! the previous window and the current one. The previous count is weighted by
//! how much of it still overlaps the sliding window ending at `now`, so memory
//! per key is constant.

use std::collections::HashMap;

use super::strategy::{RateLimitResult, RateLimitStrategy, WINDOW_MS};

#[derive(Debug, Clone, Copy)]
struct Window {
    previous_count: u64,
    current_count: u64,
    window_start: u64,
}

impl Window {
    fn starting_at(now_ms: u64) -> Self {
        Self {
            previous_count: 0,
            current_count: 0,
            window_start: now_ms - now_ms % WINDOW_MS,
        }
    }

    /// Advance to the window containing `now_ms`.
    fn roll_over(&mut self, now_ms: u64) {
        let elapsed = now_ms.saturating_sub(self.window_start);
        if elapsed < WINDOW_MS {
            return;
        }
        let windows_passed = elapsed / WINDOW_MS;
        // Anything older than the immediately preceding window no longer overlaps.
        self.previous_count = if windows_passed == 1 {
            self.current_count
        } else {
            0
        };
        self.current_count = 0;
        self.window_start += windows_passed * WINDOW_MS;
    }

    fn weighted(&self, elapsed_ms: u64) -> f64 {
        let elapsed_fraction = elapsed_ms as f64 / WINDOW_MS as f64;
        self.previous_count as f64 * (1.0 - elapsed_fraction) + self.current_count as f64
    }
}

/// Sliding window rate limiter admitting `capacity` units per second.
#[derive(Debug)]
pub struct SlidingWindow {
    capacity: f64,
    windows: HashMap<String, Window>,
}

impl SlidingWindow {
    /// Create a sliding window limiter admitting `capacity` units per window.
    pub fn new(capacity: f64) -> Self {
        Self {
            capacity,
            windows: HashMap::new(),
        }
    }

    /// Units admitted per window.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }
}

/// Time until the weighted count leaves room for `cost`.
fn retry_after_ms(window: &Window, elapsed_ms: u64, capacity: f64, cost: f64) -> u64 {
    let until_rollover = WINDOW_MS - elapsed_ms;
    let headroom = capacity - cost - window.current_count as f64;

    if headroom >= 0.0 && window.previous_count > 0 {
        // The previous window's weight decays linearly to zero at roll-over.
        let fraction_needed = 1.0 - headroom / window.previous_count as f64;
        let wait = (fraction_needed * WINDOW_MS as f64 - elapsed_ms as f64).ceil();
        return (wait.max(1.0) as u64).min(until_rollover);
    }

    let headroom_next = capacity - cost;
    if headroom_next < 0.0 {
        return u64::MAX;
    }
    if window.current_count == 0 {
        return until_rollover;
    }
    // After roll-over the current count becomes the decaying previous count.
    let fraction_needed = (1.0 - headroom_next / window.current_count as f64).max(0.0);
    until_rollover + (fraction_needed * WINDOW_MS as f64).ceil() as u64
}

impl RateLimitStrategy for SlidingWindow {
    fn name(&self) -> &'static str {
        "sliding-window"
    }

    fn try_consume(&mut self, key: &str, cost: u32, now_ms: u64) -> RateLimitResult {
        let capacity = self.capacity;
        let window = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| Window::starting_at(now_ms));

        window.roll_over(now_ms);

        let elapsed = now_ms.saturating_sub(window.window_start);
        let weighted = window.weighted(elapsed);
        let requested = f64::from(cost);

        if weighted + requested <= capacity {
            window.current_count += u64::from(cost);
            let remaining = (capacity - weighted - requested).floor().max(0.0);
            RateLimitResult::allowed(remaining as u64)
        } else {
            let remaining = (capacity - weighted).floor().max(0.0);
            RateLimitResult::denied(
                remaining as u64,
                retry_after_ms(window, elapsed, capacity, requested),
            )
        }
    }

    fn reset(&mut self, key: &str) {
        if let Some(window) = self.windows.get_mut(key) {
            window.previous_count = 0;
            window.current_count = 0;
        }
    }

    fn dispose(&mut self, key: &str) {
        self.windows.remove(key);
    }

    fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}
