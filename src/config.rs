//! Configuration management for Roomgate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use tracing::info;

use crate::error::{Result, RoomgateError};
use crate::ratelimit::{MessageRateLimitConfig, MessageRule, RateLimitConfig};

/// Prefix for environment overrides, e.g. `ROOMGATE__SERVER__LISTEN_ADDR`.
const ENV_PREFIX: &str = "ROOMGATE";

/// Main configuration for the Roomgate server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoomgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Room default rate limits
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Per-message-type rules layered over the room's own registrations
    #[serde(default)]
    pub messages: HashMap<String, MessageRule>,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// TCP address to accept players on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Longest accepted message line in bytes
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 7400))
}

fn default_max_line_bytes() -> usize {
    64 * 1024
}

impl RoomgateConfig {
    /// Load configuration from an optional YAML file, then apply
    /// `ROOMGATE__*` environment overrides.
    ///
    /// Message types keep the case they are written with in the file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        let mut written_types = Vec::new();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration");
            written_types = message_types_in(path)?;
            builder = builder.add_source(
                ::config::File::from(path).format(::config::FileFormat::Yaml),
            );
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: RoomgateConfig = builder
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| RoomgateError::Config(e.to_string()))?;
        config.messages = restore_message_case(config.messages, &written_types);
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: RoomgateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| RoomgateError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject limits that cannot admit anything.
    pub fn validate(&self) -> Result<()> {
        if self.server.max_line_bytes == 0 {
            return Err(RoomgateError::Config(
                "server.max_line_bytes must be positive".to_string(),
            ));
        }

        validate_limits(
            "rate_limit",
            Some(self.rate_limit.messages_per_second),
            self.rate_limit.burst_size,
        )?;

        for (message_type, rule) in &self.messages {
            let MessageRateLimitConfig {
                messages_per_second,
                burst_size,
                ..
            } = rule.limits;
            validate_limits(
                &format!("messages.{}", message_type),
                messages_per_second,
                burst_size,
            )?;
        }

        Ok(())
    }
}

/// The `messages` keys of a YAML file as written.
///
/// Keys are lowercased when layered through the `config` crate, so two types
/// differing only in case cannot both be loaded and are rejected.
fn message_types_in(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)?;
    let document: serde_yaml::Value = serde_yaml::from_str(&text)
        .map_err(|e| RoomgateError::Config(format!("Failed to parse configuration: {}", e)))?;

    let types: Vec<String> = document
        .get("messages")
        .and_then(serde_yaml::Value::as_mapping)
        .map(|messages| {
            messages
                .keys()
                .filter_map(|key| key.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    for (i, message_type) in types.iter().enumerate() {
        let lowered = message_type.to_lowercase();
        if let Some(other) = types[i + 1..].iter().find(|t| t.to_lowercase() == lowered) {
            return Err(RoomgateError::Config(format!(
                "messages.{} and messages.{} differ only in case",
                message_type, other
            )));
        }
    }
    Ok(types)
}

fn restore_message_case(
    messages: HashMap<String, MessageRule>,
    written: &[String],
) -> HashMap<String, MessageRule> {
    messages
        .into_iter()
        .map(|(key, rule)| {
            let key = written
                .iter()
                .find(|message_type| message_type.to_lowercase() == key)
                .cloned()
                .unwrap_or(key);
            (key, rule)
        })
        .collect()
}

fn validate_limits(section: &str, rate: Option<f64>, burst: Option<u32>) -> Result<()> {
    if let Some(rate) = rate {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(RoomgateError::Config(format!(
                "{}.messages_per_second must be a positive number, got {}",
                section, rate
            )));
        }
    }
    if burst == Some(0) {
        return Err(RoomgateError::Config(format!(
            "{}.burst_size must be at least 1",
            section
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{StrategyKind, UnknownMessagePolicy};
    use parking_lot::Mutex;
    use std::path::PathBuf;

    /// Serializes tests that read or write `ROOMGATE__*` variables.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn write_temp_config(contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("roomgate-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let config = RoomgateConfig::default();
        assert_eq!(config.server.listen_addr.port(), 7400);
        assert_eq!(config.server.max_line_bytes, 65536);
        assert_eq!(config.rate_limit.strategy, StrategyKind::TokenBucket);
        assert!(config.messages.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
server:
  listen_addr: 0.0.0.0:9000
rate_limit:
  strategy: fixed-window
  messages_per_second: 5
  burst_size: 8
  unknown_messages: exempt
messages:
  chat:
    messages_per_second: 2
  emote:
    exempt: true
"#;
        let config = RoomgateConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.listen_addr.port(), 9000);
        assert_eq!(config.server.max_line_bytes, 65536);
        assert_eq!(config.rate_limit.strategy, StrategyKind::FixedWindow);
        assert_eq!(config.rate_limit.burst_size, Some(8));
        assert_eq!(config.rate_limit.unknown_messages, UnknownMessagePolicy::Exempt);
        assert_eq!(config.messages["chat"].limits.messages_per_second, Some(2.0));
        assert!(config.messages["emote"].exempt);
    }

    #[test]
    fn test_rejects_zero_rate() {
        let err = RoomgateConfig::from_yaml("rate_limit:\n  messages_per_second: 0\n").unwrap_err();
        assert!(matches!(err, RoomgateError::Config(_)));
    }

    #[test]
    fn test_rejects_zero_burst_in_message_rule() {
        let yaml = r#"
messages:
  trade:
    burst_size: 0
"#;
        let err = RoomgateConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("messages.trade.burst_size"));
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let _env = ENV_LOCK.lock();
        let config = RoomgateConfig::load(None).unwrap();
        assert_eq!(config.rate_limit.messages_per_second, 10.0);
    }

    #[test]
    fn test_load_from_file() {
        let _env = ENV_LOCK.lock();
        let path = write_temp_config("rate_limit:\n  strategy: sliding-window\n  burst_size: 3\n");

        let config = RoomgateConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.rate_limit.strategy, StrategyKind::SlidingWindow);
        assert_eq!(config.rate_limit.burst_size, Some(3));
    }

    #[test]
    fn test_load_keeps_message_type_case() {
        let _env = ENV_LOCK.lock();
        let path = write_temp_config(
            "messages:\n  Trade:\n    burst_size: 1\n  ping:\n    exempt: true\n",
        );

        let config = RoomgateConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        let mut types: Vec<&str> = config.messages.keys().map(String::as_str).collect();
        types.sort_unstable();
        assert_eq!(types, vec!["Trade", "ping"]);
        assert_eq!(config.messages["Trade"].limits.burst_size, Some(1));

        let yaml = RoomgateConfig::from_yaml("messages:\n  Trade:\n    burst_size: 1\n").unwrap();
        assert!(yaml.messages.contains_key("Trade"));
    }

    #[test]
    fn test_load_rejects_types_differing_in_case() {
        let _env = ENV_LOCK.lock();
        let path = write_temp_config(
            "messages:\n  Trade:\n    burst_size: 1\n  trade:\n    burst_size: 2\n",
        );

        let result = RoomgateConfig::load(Some(&path));
        std::fs::remove_file(&path).unwrap();

        let err = result.unwrap_err();
        assert!(err.to_string().contains("differ only in case"));
    }

    #[test]
    fn test_load_applies_env_overrides() {
        let _env = ENV_LOCK.lock();
        let path = write_temp_config(
            "rate_limit:\n  strategy: sliding-window\nmessages:\n  Trade:\n    burst_size: 1\n",
        );
        std::env::set_var("ROOMGATE__RATE_LIMIT__STRATEGY", "fixed-window");
        std::env::set_var("ROOMGATE__MESSAGES__TRADE__BURST_SIZE", "4");

        let result = RoomgateConfig::load(Some(&path));
        std::env::remove_var("ROOMGATE__RATE_LIMIT__STRATEGY");
        std::env::remove_var("ROOMGATE__MESSAGES__TRADE__BURST_SIZE");
        std::fs::remove_file(&path).unwrap();

        let config = result.unwrap();
        assert_eq!(config.rate_limit.strategy, StrategyKind::FixedWindow);
        assert_eq!(config.messages.len(), 1);
        assert_eq!(config.messages["Trade"].limits.burst_size, Some(4));
    }
}
