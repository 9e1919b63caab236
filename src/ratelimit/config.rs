//! Rate limit configuration for rooms and individual message types.

use serde::{Deserialize, Serialize};

use super::strategy::{create_strategy, RateLimitStrategy, StrategyKind};

/// Default steady-state rate when none is configured.
pub const DEFAULT_MESSAGES_PER_SECOND: f64 = 10.0;
/// Units consumed by one message unless its type says otherwise.
pub const DEFAULT_COST: u32 = 1;
/// Default burst size as a multiple of the rate.
const DEFAULT_BURST_FACTOR: f64 = 2.0;

/// What to do with message types that have no registered metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownMessagePolicy {
    /// Charge them against the player's default allowance.
    #[default]
    Limit,
    /// Let them through untouched.
    Exempt,
}

/// Room-level default limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Admission algorithm; unknown names fall back to the token bucket.
    #[serde(default)]
    pub strategy: StrategyKind,

    /// Steady-state messages per second
    #[serde(default = "default_messages_per_second")]
    pub messages_per_second: f64,

    /// Burst capacity; twice the rate when unset
    #[serde(default)]
    pub burst_size: Option<u32>,

    /// Handling of message types without metadata
    #[serde(default)]
    pub unknown_messages: UnknownMessagePolicy,
}

fn default_messages_per_second() -> f64 {
    DEFAULT_MESSAGES_PER_SECOND
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default(),
            messages_per_second: default_messages_per_second(),
            burst_size: None,
            unknown_messages: UnknownMessagePolicy::default(),
        }
    }
}

impl RateLimitConfig {
    /// Default limits using the given strategy.
    pub fn with_strategy(strategy: StrategyKind) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    /// Burst capacity of the room default.
    pub fn capacity(&self) -> f64 {
        match self.burst_size {
            Some(burst) => f64::from(burst),
            None => self.messages_per_second * DEFAULT_BURST_FACTOR,
        }
    }

    /// Overlay a per-message override on the room default.
    ///
    /// Fields the override leaves unset come from this config. When neither
    /// sets a burst size it is derived from the effective rate.
    pub fn effective(&self, message: Option<&MessageRateLimitConfig>) -> EffectiveLimit {
        let message = message.cloned().unwrap_or_default();
        let messages_per_second = message
            .messages_per_second
            .unwrap_or(self.messages_per_second);
        let capacity = match message.burst_size.or(self.burst_size) {
            Some(burst) => f64::from(burst),
            None => messages_per_second * DEFAULT_BURST_FACTOR,
        };

        EffectiveLimit {
            strategy: self.strategy,
            messages_per_second,
            capacity,
            cost: message.cost.unwrap_or(DEFAULT_COST),
        }
    }

    /// Build a strategy with the room default limits.
    pub fn build_strategy(&self) -> Box<dyn RateLimitStrategy> {
        self.effective(None).build_strategy()
    }
}

/// Per-message-type override. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageRateLimitConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages_per_second: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst_size: Option<u32>,

    /// Units one message of this type consumes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<u32>,
}

impl MessageRateLimitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages_per_second(mut self, rate: f64) -> Self {
        self.messages_per_second = Some(rate);
        self
    }

    pub fn burst_size(mut self, burst: u32) -> Self {
        self.burst_size = Some(burst);
        self
    }

    pub fn cost(mut self, cost: u32) -> Self {
        self.cost = Some(cost);
        self
    }

    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        self.messages_per_second.is_none() && self.burst_size.is_none() && self.cost.is_none()
    }

    /// Take every field `incoming` sets, keep the rest.
    pub fn merge(&mut self, incoming: &MessageRateLimitConfig) {
        if incoming.messages_per_second.is_some() {
            self.messages_per_second = incoming.messages_per_second;
        }
        if incoming.burst_size.is_some() {
            self.burst_size = incoming.burst_size;
        }
        if incoming.cost.is_some() {
            self.cost = incoming.cost;
        }
    }
}

/// Fully resolved limits for one message type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectiveLimit {
    pub strategy: StrategyKind,
    pub messages_per_second: f64,
    pub capacity: f64,
    pub cost: u32,
}

impl EffectiveLimit {
    pub fn build_strategy(&self) -> Box<dyn RateLimitStrategy> {
        create_strategy(self.strategy, self.messages_per_second, self.capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RateLimitConfig::default();
        assert_eq!(config.strategy, StrategyKind::TokenBucket);
        assert_eq!(config.messages_per_second, 10.0);
        assert_eq!(config.capacity(), 20.0);
        assert_eq!(config.unknown_messages, UnknownMessagePolicy::Limit);
    }

    #[test]
    fn test_effective_inherits_room_default() {
        let room = RateLimitConfig {
            burst_size: Some(15),
            ..RateLimitConfig::default()
        };

        let limit = room.effective(Some(&MessageRateLimitConfig::new().messages_per_second(2.0)));
        assert_eq!(limit.messages_per_second, 2.0);
        assert_eq!(limit.capacity, 15.0);
        assert_eq!(limit.cost, DEFAULT_COST);

        let limit = room.effective(Some(&MessageRateLimitConfig::new().burst_size(1).cost(3)));
        assert_eq!(limit.messages_per_second, 10.0);
        assert_eq!(limit.capacity, 1.0);
        assert_eq!(limit.cost, 3);
    }

    #[test]
    fn test_effective_derives_burst_from_override_rate() {
        let room = RateLimitConfig::default();
        let limit = room.effective(Some(&MessageRateLimitConfig::new().messages_per_second(3.0)));
        assert_eq!(limit.capacity, 6.0);
    }

    #[test]
    fn test_merge_keeps_unset_fields() {
        let mut config = MessageRateLimitConfig::new().messages_per_second(1.0);
        config.merge(&MessageRateLimitConfig::new().burst_size(2));

        assert_eq!(config.messages_per_second, Some(1.0));
        assert_eq!(config.burst_size, Some(2));
        assert_eq!(config.cost, None);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
strategy: sliding-window
messages_per_second: 4
burst_size: 6
unknown_messages: exempt
"#;
        let config: RateLimitConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.strategy, StrategyKind::SlidingWindow);
        assert_eq!(config.messages_per_second, 4.0);
        assert_eq!(config.capacity(), 6.0);
        assert_eq!(config.unknown_messages, UnknownMessagePolicy::Exempt);

        let config: RateLimitConfig = serde_yaml::from_str("strategy: bogus").unwrap();
        assert_eq!(config.strategy, StrategyKind::TokenBucket);
        assert_eq!(config.messages_per_second, 10.0);
    }
}
