//! Per-room-type table of message rate limit metadata.
//!
//! A [`RateLimitRegistry`] is built once for a room type with
//! [`RateLimitRegistryBuilder`] and then shared read-only by every room of
//! that type:
//!
//! ```
//! use roomgate::ratelimit::{MessageRateLimitConfig, RateLimitRegistry};
//!
//! let registry = RateLimitRegistry::builder()
//!     .rate_limit_message("trade", MessageRateLimitConfig::new().burst_size(1))
//!     .no_rate_limit_message("ping")
//!     .build();
//!
//! assert!(registry.is_exempt("ping"));
//! assert!(registry.get("trade").unwrap().has_override());
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::config::{MessageRateLimitConfig, DEFAULT_COST};

/// Rate limit settings for one message type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitMetadata {
    /// Whether rate limiting applies to this type
    pub enabled: bool,

    /// Explicitly excluded from rate limiting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exempt: Option<bool>,

    /// Limits that override the room default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<MessageRateLimitConfig>,
}

impl RateLimitMetadata {
    /// Limited, optionally with its own limits.
    pub fn limited(config: Option<MessageRateLimitConfig>) -> Self {
        Self {
            enabled: true,
            exempt: None,
            config,
        }
    }

    /// Excluded from rate limiting.
    pub fn exempt() -> Self {
        Self {
            enabled: false,
            exempt: Some(true),
            config: None,
        }
    }

    /// True when messages of this type bypass the limiter.
    pub fn is_exempt(&self) -> bool {
        self.exempt == Some(true) || !self.enabled
    }

    /// True when this type gets its own allowance instead of the default one.
    pub fn has_override(&self) -> bool {
        self.config.is_some()
    }

    /// Units one message of this type consumes.
    pub fn cost(&self) -> u32 {
        self.config
            .as_ref()
            .and_then(|config| config.cost)
            .unwrap_or(DEFAULT_COST)
    }

    /// Fold a later registration into this one.
    ///
    /// `enabled` follows the later registration. `exempt` and each config
    /// field keep their earlier value unless the later one sets them.
    pub fn merge(&mut self, incoming: RateLimitMetadata) {
        self.enabled = incoming.enabled;
        if incoming.exempt.is_some() {
            self.exempt = incoming.exempt;
        }
        if let Some(config) = incoming.config {
            match self.config.as_mut() {
                Some(existing) => existing.merge(&config),
                None => self.config = Some(config),
            }
        }
    }
}

/// Rule for one message type as written in a configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageRule {
    #[serde(default)]
    pub exempt: bool,

    #[serde(flatten)]
    pub limits: MessageRateLimitConfig,
}

impl From<MessageRule> for RateLimitMetadata {
    /// A rule without limits keeps the type on the default allowance.
    fn from(rule: MessageRule) -> Self {
        if rule.exempt {
            RateLimitMetadata::exempt()
        } else if rule.limits.is_empty() {
            RateLimitMetadata::limited(None)
        } else {
            RateLimitMetadata::limited(Some(rule.limits))
        }
    }
}

/// Read-only lookup from message type to its metadata.
#[derive(Debug, Clone, Default)]
pub struct RateLimitRegistry {
    entries: HashMap<String, RateLimitMetadata>,
}

impl RateLimitRegistry {
    pub fn builder() -> RateLimitRegistryBuilder {
        RateLimitRegistryBuilder::default()
    }

    /// Metadata registered for `message_type`, if any.
    pub fn get(&self, message_type: &str) -> Option<&RateLimitMetadata> {
        self.entries.get(message_type)
    }

    pub fn is_exempt(&self, message_type: &str) -> bool {
        self.get(message_type)
            .map(RateLimitMetadata::is_exempt)
            .unwrap_or(false)
    }

    /// Units one message of `message_type` consumes.
    pub fn cost(&self, message_type: &str) -> u32 {
        self.get(message_type)
            .map(RateLimitMetadata::cost)
            .unwrap_or(DEFAULT_COST)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered message types, in no particular order.
    pub fn message_types(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Collects registrations for a room type.
#[derive(Debug, Clone, Default)]
pub struct RateLimitRegistryBuilder {
    entries: HashMap<String, RateLimitMetadata>,
}

impl RateLimitRegistryBuilder {
    /// Merge `metadata` into whatever is registered for `message_type`.
    pub fn register(mut self, message_type: impl Into<String>, metadata: RateLimitMetadata) -> Self {
        let message_type = message_type.into();
        debug!(message_type = %message_type, metadata = ?metadata, "Registering rate limit metadata");
        match self.entries.get_mut(&message_type) {
            Some(existing) => existing.merge(metadata),
            None => {
                self.entries.insert(message_type, metadata);
            }
        }
        self
    }

    /// Limit `message_type` with its own allowance.
    pub fn rate_limit_message(
        self,
        message_type: impl Into<String>,
        config: MessageRateLimitConfig,
    ) -> Self {
        self.register(message_type, RateLimitMetadata::limited(Some(config)))
    }

    /// Limit `message_type` against the player's default allowance.
    pub fn enable_rate_limit(self, message_type: impl Into<String>) -> Self {
        self.register(message_type, RateLimitMetadata::limited(None))
    }

    /// Exclude `message_type` from rate limiting.
    pub fn no_rate_limit_message(self, message_type: impl Into<String>) -> Self {
        self.register(message_type, RateLimitMetadata::exempt())
    }

    /// Layer rules loaded from configuration over the registrations so far.
    pub fn apply_rules<I, K>(self, rules: I) -> Self
    where
        I: IntoIterator<Item = (K, MessageRule)>,
        K: Into<String>,
    {
        rules
            .into_iter()
            .fold(self, |builder, (message_type, rule)| {
                builder.register(message_type, rule.into())
            })
    }

    pub fn build(self) -> RateLimitRegistry {
        RateLimitRegistry {
            entries: self.entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_type_has_no_metadata() {
        let registry = RateLimitRegistry::builder().build();
        assert!(registry.get("chat").is_none());
        assert!(!registry.is_exempt("chat"));
        assert_eq!(registry.cost("chat"), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_exempt_registration() {
        let registry = RateLimitRegistry::builder()
            .no_rate_limit_message("ping")
            .build();

        let metadata = registry.get("ping").unwrap();
        assert!(!metadata.enabled);
        assert_eq!(metadata.exempt, Some(true));
        assert!(registry.is_exempt("ping"));
    }

    #[test]
    fn test_config_fields_accumulate() {
        let registry = RateLimitRegistry::builder()
            .rate_limit_message("move", MessageRateLimitConfig::new().messages_per_second(1.0))
            .rate_limit_message("move", MessageRateLimitConfig::new().burst_size(2))
            .build();

        let config = registry.get("move").unwrap().config.clone().unwrap();
        assert_eq!(config.messages_per_second, Some(1.0));
        assert_eq!(config.burst_size, Some(2));
    }

    #[test]
    fn test_merge_keeps_exempt_flag() {
        let registry = RateLimitRegistry::builder()
            .no_rate_limit_message("ping")
            .rate_limit_message("ping", MessageRateLimitConfig::new().burst_size(1))
            .build();

        let metadata = registry.get("ping").unwrap();
        assert!(metadata.enabled);
        assert_eq!(metadata.exempt, Some(true));
        assert!(metadata.is_exempt());
        assert!(metadata.has_override());
    }

    #[test]
    fn test_enable_without_config_does_not_erase_override() {
        let registry = RateLimitRegistry::builder()
            .rate_limit_message("trade", MessageRateLimitConfig::new().cost(3))
            .enable_rate_limit("trade")
            .build();

        assert_eq!(registry.cost("trade"), 3);
        assert!(registry.get("trade").unwrap().has_override());
    }

    #[test]
    fn test_apply_rules_from_yaml() {
        let yaml = r#"
chat:
  messages_per_second: 2
  burst_size: 4
ping:
  exempt: true
trade:
  cost: 5
"#;
        let rules: HashMap<String, MessageRule> = serde_yaml::from_str(yaml).unwrap();
        let registry = RateLimitRegistry::builder()
            .enable_rate_limit("chat")
            .apply_rules(rules)
            .build();

        assert_eq!(registry.len(), 3);
        assert!(registry.is_exempt("ping"));
        assert_eq!(registry.cost("trade"), 5);

        let chat = registry.get("chat").unwrap().config.clone().unwrap();
        assert_eq!(chat.messages_per_second, Some(2.0));
        assert_eq!(chat.burst_size, Some(4));
    }

    #[test]
    fn test_rule_without_limits_uses_default_allowance() {
        let yaml = r#"
chat: {}
emote:
  exempt: false
"#;
        let rules: HashMap<String, MessageRule> = serde_yaml::from_str(yaml).unwrap();
        let registry = RateLimitRegistry::builder().apply_rules(rules).build();

        for message_type in ["chat", "emote"] {
            let metadata = registry.get(message_type).unwrap();
            assert!(metadata.enabled);
            assert!(!metadata.is_exempt());
            assert!(!metadata.has_override(), "{} got its own allowance", message_type);
        }
    }
}
