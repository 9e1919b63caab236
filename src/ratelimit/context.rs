//! Per-player rate limit state for one room.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace};

use super::config::{RateLimitConfig, UnknownMessagePolicy};
use super::metadata::RateLimitRegistry;
use super::strategy::{RateLimitResult, RateLimitStrategy};

/// Limiter state a room keeps for one of its players.
pub trait RateLimitContext: Send + std::fmt::Debug {
    /// The player this context belongs to.
    fn player_id(&self) -> &str;

    /// Check and record one message of `message_type` costing `cost` units.
    fn check(&mut self, message_type: &str, cost: u32, now_ms: u64) -> RateLimitResult;

    /// Restore the full allowance for every strategy this context owns.
    fn reset(&mut self);

    /// Release all strategy state. Safe to call more than once.
    fn dispose(&mut self);

    /// Number of message types with their own allowance so far.
    fn override_count(&self) -> usize;
}

/// Default [`RateLimitContext`] implementation.
///
/// Message types without an override share one allowance keyed by the player
/// id. Each overridden type gets a strategy of its own, created on first use
/// and keyed by `"{player_id}:{message_type}"`, so exhausting one never
/// affects the other.
#[derive(Debug)]
pub struct PlayerRateLimitContext {
    player_id: String,
    registry: Arc<RateLimitRegistry>,
    room_config: Arc<RateLimitConfig>,
    default_strategy: Option<Box<dyn RateLimitStrategy>>,
    overrides: HashMap<String, Box<dyn RateLimitStrategy>>,
}

impl PlayerRateLimitContext {
    pub fn new(
        player_id: impl Into<String>,
        registry: Arc<RateLimitRegistry>,
        room_config: Arc<RateLimitConfig>,
    ) -> Self {
        Self {
            player_id: player_id.into(),
            registry,
            room_config,
            default_strategy: None,
            overrides: HashMap::new(),
        }
    }

    fn override_key(&self, message_type: &str) -> String {
        format!("{}:{}", self.player_id, message_type)
    }

    fn is_exempt(&self, message_type: &str) -> bool {
        match self.registry.get(message_type) {
            Some(metadata) => metadata.is_exempt(),
            None => self.room_config.unknown_messages == UnknownMessagePolicy::Exempt,
        }
    }

    /// Number of strategy keys this context currently holds.
    pub fn tracked_keys(&self) -> usize {
        let default_keys = self
            .default_strategy
            .as_ref()
            .map(|strategy| strategy.tracked_keys())
            .unwrap_or(0);
        default_keys
            + self
                .overrides
                .values()
                .map(|strategy| strategy.tracked_keys())
                .sum::<usize>()
    }
}

impl RateLimitContext for PlayerRateLimitContext {
    fn player_id(&self) -> &str {
        &self.player_id
    }

    fn check(&mut self, message_type: &str, cost: u32, now_ms: u64) -> RateLimitResult {
        if self.is_exempt(message_type) {
            trace!(player = %self.player_id, message_type = %message_type, "Exempt message");
            return RateLimitResult::unlimited();
        }

        let override_config = self
            .registry
            .get(message_type)
            .and_then(|metadata| metadata.config.clone());

        let result = match override_config {
            Some(config) => {
                let key = self.override_key(message_type);
                let room_config = &self.room_config;
                let player_id = &self.player_id;
                let strategy = self
                    .overrides
                    .entry(message_type.to_string())
                    .or_insert_with(|| {
                        let limit = room_config.effective(Some(&config));
                        debug!(
                            player = %player_id,
                            message_type = %message_type,
                            strategy = %limit.strategy,
                            messages_per_second = limit.messages_per_second,
                            capacity = limit.capacity,
                            "Creating message rate limit override"
                        );
                        limit.build_strategy()
                    });
                strategy.try_consume(&key, cost, now_ms)
            }
            None => {
                let room_config = &self.room_config;
                let strategy = self
                    .default_strategy
                    .get_or_insert_with(|| room_config.build_strategy());
                strategy.try_consume(&self.player_id, cost, now_ms)
            }
        };

        trace!(
            player = %self.player_id,
            message_type = %message_type,
            cost = cost,
            allowed = result.allowed,
            remaining = result.remaining,
            "Checked rate limit"
        );

        result
    }

    fn reset(&mut self) {
        if let Some(strategy) = self.default_strategy.as_mut() {
            strategy.reset(&self.player_id);
        }
        for (message_type, strategy) in self.overrides.iter_mut() {
            strategy.reset(&format!("{}:{}", self.player_id, message_type));
        }
    }

    fn dispose(&mut self) {
        if let Some(mut strategy) = self.default_strategy.take() {
            strategy.dispose(&self.player_id);
        }
        for (message_type, mut strategy) in self.overrides.drain() {
            strategy.dispose(&format!("{}:{}", self.player_id, message_type));
        }
    }

    fn override_count(&self) -> usize {
        self.overrides.len()
    }
}

impl Drop for PlayerRateLimitContext {
    fn drop(&mut self) {
        self.dispose();
    }
}
