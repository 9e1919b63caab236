//! Room and player seams, plus the rate-limiting wrapper for rooms.
//!
//! [`Room`] and [`Player`] are the host server's types. This crate only needs
//! the dispatch entry point and the player lifecycle hooks from them.

mod gate;
mod rate_limited;

pub use gate::RateLimitGate;
pub use rate_limited::{with_rate_limit, RateLimitPolicy, RateLimitedRoom};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Identity of a connected player.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random id.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PlayerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for PlayerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A decoded message from a player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub data: Value,
}

impl IncomingMessage {
    pub fn new(message_type: impl Into<String>, data: Value) -> Self {
        Self {
            message_type: message_type.into(),
            data,
        }
    }

    /// Decode one JSON object of the form `{"type": "...", "data": ...}`.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// A message sent to a player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub data: Value,
}

impl OutgoingMessage {
    pub fn new(message_type: impl Into<String>, data: Value) -> Self {
        Self {
            message_type: message_type.into(),
            data,
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self::new("error", serde_json::json!({ "reason": reason.into() }))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A connected player as seen by a room.
pub trait Player: Send + Sync + std::fmt::Debug {
    fn id(&self) -> &PlayerId;

    /// Queue a message for the player.
    fn send(&self, message: OutgoingMessage) -> Result<()>;

    /// Disconnect the player.
    fn leave(&self);
}

/// Players are shared between the connection and the room.
pub type SharedPlayer = Arc<dyn Player>;

/// A game or chat room driven by the host server.
///
/// All hooks run to completion on the caller's task; a room is never entered
/// concurrently.
pub trait Room: Send {
    fn on_join(&mut self, _player: &SharedPlayer) {}

    /// Handle one message from `player`.
    fn handle_message(&mut self, player: &SharedPlayer, message: IncomingMessage);

    fn on_leave(&mut self, _player: &SharedPlayer) {}

    /// Release everything the room holds. Called once when the room closes.
    fn dispose(&mut self) {}
}
