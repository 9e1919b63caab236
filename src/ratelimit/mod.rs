//! Rate limiting strategies, per-player contexts and message metadata.

mod clock;
mod config;
mod context;
mod fixed_window;
mod metadata;
mod sliding_window;
mod strategy;
mod token_bucket;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{
    EffectiveLimit, MessageRateLimitConfig, RateLimitConfig, UnknownMessagePolicy, DEFAULT_COST,
    DEFAULT_MESSAGES_PER_SECOND,
};
pub use context::{PlayerRateLimitContext, RateLimitContext};
pub use fixed_window::FixedWindow;
pub use metadata::{MessageRule, RateLimitMetadata, RateLimitRegistry, RateLimitRegistryBuilder};
pub use sliding_window::SlidingWindow;
pub use strategy::{create_strategy, RateLimitResult, RateLimitStrategy, StrategyKind, WINDOW_MS};
pub use token_bucket::TokenBucket;
