//! The strategy trait shared by every admission algorithm.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::fixed_window::FixedWindow;
use super::sliding_window::SlidingWindow;
use super::token_bucket::TokenBucket;

/// Length of the counting window used by the windowed strategies.
pub const WINDOW_MS: u64 = 1000;

/// Outcome of a single admission check.
///
/// `remaining` and `retry_after_ms` are advisory: time keeps moving between
/// the check and any retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Whether the message may reach its handler.
    pub allowed: bool,
    /// Whole units still available after this check.
    pub remaining: u64,
    /// Suggested wait before the same cost could be admitted.
    pub retry_after_ms: u64,
}

impl RateLimitResult {
    /// An admission with `remaining` units left.
    pub fn allowed(remaining: u64) -> Self {
        Self {
            allowed: true,
            remaining,
            retry_after_ms: 0,
        }
    }

    /// A denial.
    pub fn denied(remaining: u64, retry_after_ms: u64) -> Self {
        Self {
            allowed: false,
            remaining,
            retry_after_ms,
        }
    }

    /// Admission for messages that are not rate limited at all.
    pub fn unlimited() -> Self {
        Self::allowed(u64::MAX)
    }
}

/// An admission-control algorithm holding per-key state.
///
/// Keys are opaque strings chosen by the caller. Implementations must be O(1)
/// per call and must drop all state for a key on [`dispose`](Self::dispose).
pub trait RateLimitStrategy: Send + std::fmt::Debug {
    /// Stable name of the algorithm, e.g. `"token-bucket"`.
    fn name(&self) -> &'static str;

    /// Try to consume `cost` units for `key` at time `now_ms`.
    fn try_consume(&mut self, key: &str, cost: u32, now_ms: u64) -> RateLimitResult;

    /// Forget usage for `key`; the next call starts from a full allowance.
    fn reset(&mut self, key: &str);

    /// Evict all state for `key`.
    fn dispose(&mut self, key: &str);

    /// Number of keys currently holding state.
    fn tracked_keys(&self) -> usize;
}

/// The available strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StrategyKind {
    #[default]
    TokenBucket,
    SlidingWindow,
    FixedWindow,
}

impl StrategyKind {
    /// Parse a strategy name, falling back to the token bucket for anything
    /// unrecognised.
    pub fn from_name(name: &str) -> Self {
        match name {
            "token-bucket" => StrategyKind::TokenBucket,
            "sliding-window" => StrategyKind::SlidingWindow,
            "fixed-window" => StrategyKind::FixedWindow,
            other => {
                warn!(
                    strategy = %other,
                    "Unknown rate limit strategy, falling back to token-bucket"
                );
                StrategyKind::TokenBucket
            }
        }
    }

    /// The name reported by strategies of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::TokenBucket => "token-bucket",
            StrategyKind::SlidingWindow => "sliding-window",
            StrategyKind::FixedWindow => "fixed-window",
        }
    }
}

impl From<String> for StrategyKind {
    fn from(name: String) -> Self {
        Self::from_name(&name)
    }
}

impl From<StrategyKind> for String {
    fn from(kind: StrategyKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build a strategy of the given kind.
///
/// `rate` is in messages per second and only drives the token bucket; the
/// windowed strategies admit `capacity` per [`WINDOW_MS`].
pub fn create_strategy(kind: StrategyKind, rate: f64, capacity: f64) -> Box<dyn RateLimitStrategy> {
    match kind {
        StrategyKind::TokenBucket => Box::new(TokenBucket::new(rate, capacity)),
        StrategyKind::SlidingWindow => Box::new(SlidingWindow::new(capacity)),
        StrategyKind::FixedWindow => Box::new(FixedWindow::new(capacity)),
    }
}
