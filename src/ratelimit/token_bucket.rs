//! Token bucket strategy.

use std::collections::HashMap;

use super::strategy::{RateLimitResult, RateLimitStrategy};

/// Per-key bucket state.
#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill_ms: u64,
}

/// Token bucket rate limiter.
///
/// Each key starts with `capacity` tokens that refill continuously at `rate`
/// tokens per second. This allows bursts up to `capacity` followed by a
/// steady `rate` per second.
#[derive(Debug)]
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    buckets: HashMap<String, Bucket>,
}

impl TokenBucket {
    /// Create a token bucket.
    ///
    /// # Arguments
    /// * `rate` - Tokens added per second
    /// * `capacity` - Maximum token capacity (burst size)
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            rate,
            capacity,
            buckets: HashMap::new(),
        }
    }

    /// Tokens added per second.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Maximum tokens per key.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Time until `cost` tokens are available; `u64::MAX` when never.
    fn retry_after_ms(&self, cost: f64, missing: f64) -> u64 {
        if self.rate <= 0.0 || cost > self.capacity {
            return u64::MAX;
        }
        (missing / self.rate * 1000.0).ceil() as u64
    }
}

impl RateLimitStrategy for TokenBucket {
    fn name(&self) -> &'static str {
        "token-bucket"
    }

    fn try_consume(&mut self, key: &str, cost: u32, now_ms: u64) -> RateLimitResult {
        let capacity = self.capacity;
        let rate = self.rate;
        let bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket {
                tokens: capacity,
                last_refill_ms: now_ms,
            });

        let elapsed = now_ms.saturating_sub(bucket.last_refill_ms) as f64;
        bucket.tokens = (bucket.tokens + elapsed * rate / 1000.0).min(capacity);
        bucket.last_refill_ms = now_ms;

        let cost = f64::from(cost);
        if bucket.tokens >= cost {
            bucket.tokens -= cost;
            RateLimitResult::allowed(bucket.tokens.floor() as u64)
        } else {
            let tokens = bucket.tokens;
            RateLimitResult::denied(tokens.floor() as u64, self.retry_after_ms(cost, cost - tokens))
        }
    }

    fn reset(&mut self, key: &str) {
        if let Some(bucket) = self.buckets.get_mut(key) {
            bucket.tokens = self.capacity;
        }
    }

    fn dispose(&mut self, key: &str) {
        self.buckets.remove(key);
    }

    fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }
}
