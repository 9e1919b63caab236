//! Fixed window strategy.

use std::collections::HashMap;

use super::strategy::{RateLimitResult, RateLimitStrategy, WINDOW_MS};

#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u64,
    window_start: u64,
}

/// Fixed window rate limiter admitting `capacity` units per window.
///
/// The counter resets a full window after the first message of the previous
/// window, so up to twice the capacity can pass around a window edge.
#[derive(Debug)]
pub struct FixedWindow {
    capacity: f64,
    counters: HashMap<String, Counter>,
}

impl FixedWindow {
    /// Create a fixed window limiter admitting `capacity` units per window.
    pub fn new(capacity: f64) -> Self {
        Self {
            capacity,
            counters: HashMap::new(),
        }
    }

    /// Units admitted per window.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }
}

impl RateLimitStrategy for FixedWindow {
    fn name(&self) -> &'static str {
        "fixed-window"
    }

    fn try_consume(&mut self, key: &str, cost: u32, now_ms: u64) -> RateLimitResult {
        let capacity = self.capacity;
        let counter = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| Counter {
                count: 0,
                window_start: now_ms,
            });

        let mut elapsed = now_ms.saturating_sub(counter.window_start);
        if elapsed >= WINDOW_MS {
            counter.count = 0;
            counter.window_start = now_ms;
            elapsed = 0;
        }

        let used = counter.count as f64;
        let requested = f64::from(cost);
        if used + requested <= capacity {
            counter.count += u64::from(cost);
            let remaining = (capacity - used - requested).floor().max(0.0);
            RateLimitResult::allowed(remaining as u64)
        } else {
            let remaining = (capacity - used).floor().max(0.0);
            RateLimitResult::denied(remaining as u64, WINDOW_MS - elapsed)
        }
    }

    fn reset(&mut self, key: &str) {
        if let Some(counter) = self.counters.get_mut(key) {
            counter.count = 0;
        }
    }

    fn dispose(&mut self, key: &str) {
        self.counters.remove(key);
    }

    fn tracked_keys(&self) -> usize {
        self.counters.len()
    }
}
