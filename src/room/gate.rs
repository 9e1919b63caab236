//! Admission control for a single room.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::PlayerId;
use crate::ratelimit::{
    Clock, MonotonicClock, PlayerRateLimitContext, RateLimitConfig, RateLimitContext,
    RateLimitRegistry, RateLimitResult, RateLimitStrategy,
};

/// Owns the rate limit contexts of every player in one room.
///
/// Contexts are created on a player's first message and dropped when the
/// player leaves, so the gate holds state only for active players.
#[derive(Debug)]
pub struct RateLimitGate {
    config: Arc<RateLimitConfig>,
    registry: Arc<RateLimitRegistry>,
    /// Room-level strategy built from `config`, kept for introspection.
    rate_limit_strategy: Box<dyn RateLimitStrategy>,
    contexts: HashMap<PlayerId, PlayerRateLimitContext>,
    clock: Arc<dyn Clock>,
}

impl RateLimitGate {
    /// Create a gate using the monotonic process clock.
    pub fn new(config: RateLimitConfig, registry: Arc<RateLimitRegistry>) -> Self {
        let rate_limit_strategy = config.build_strategy();
        debug!(
            strategy = rate_limit_strategy.name(),
            messages_per_second = config.messages_per_second,
            capacity = config.capacity(),
            registered_types = registry.len(),
            "Creating rate limit gate"
        );

        Self {
            config: Arc::new(config),
            registry,
            rate_limit_strategy,
            contexts: HashMap::new(),
            clock: Arc::new(MonotonicClock::new()),
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Check one message from `player_id`, creating its context if needed.
    pub fn check(&mut self, player_id: &PlayerId, message_type: &str, cost: u32) -> RateLimitResult {
        let now_ms = self.clock.now_ms();
        let registry = &self.registry;
        let config = &self.config;
        let context = self.contexts.entry(player_id.clone()).or_insert_with(|| {
            debug!(player = %player_id, "Creating player rate limit context");
            PlayerRateLimitContext::new(player_id.as_str(), registry.clone(), config.clone())
        });

        context.check(message_type, cost, now_ms)
    }

    /// Check one message, taking its cost from the registry.
    pub fn check_message(&mut self, player_id: &PlayerId, message_type: &str) -> RateLimitResult {
        let cost = self.registry.cost(message_type);
        self.check(player_id, message_type, cost)
    }

    /// The context of `player_id`, if it has sent anything yet.
    pub fn context(&self, player_id: &PlayerId) -> Option<&PlayerRateLimitContext> {
        self.contexts.get(player_id)
    }

    /// Dispose and forget the context of `player_id`.
    ///
    /// Returns whether the player had a context.
    pub fn remove_player(&mut self, player_id: &PlayerId) -> bool {
        match self.contexts.remove(player_id) {
            Some(mut context) => {
                context.dispose();
                debug!(player = %player_id, "Disposed player rate limit context");
                true
            }
            None => false,
        }
    }

    /// Dispose every remaining context.
    pub fn dispose(&mut self) {
        let count = self.contexts.len();
        for (_, mut context) in self.contexts.drain() {
            context.dispose();
        }
        if count > 0 {
            debug!(contexts = count, "Disposed remaining rate limit contexts");
        }
    }

    pub fn rate_limit_strategy(&self) -> &dyn RateLimitStrategy {
        self.rate_limit_strategy.as_ref()
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<RateLimitRegistry> {
        &self.registry
    }

    /// Get the number of live player contexts.
    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }
}
