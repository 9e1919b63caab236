//! The lobby room served by the `roomgate` binary.
//!
//! Message types:
//! - `chat`: broadcast `data` to every player, limited by the room default
//! - `ping`: answered with `pong`, never limited
//! - `trade`: acknowledged with `trade_ack`, limited on its own allowance
//!
//! Denied messages are answered with `rate_limited`.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use crate::ratelimit::{
    MessageRateLimitConfig, RateLimitRegistry, RateLimitRegistryBuilder, RateLimitResult,
};
use crate::room::{
    IncomingMessage, OutgoingMessage, PlayerId, RateLimitPolicy, Room, SharedPlayer,
};

/// A chat lobby with a strictly limited trade action.
#[derive(Debug)]
pub struct LobbyRoom {
    players: HashMap<PlayerId, SharedPlayer>,
    registry: Arc<RateLimitRegistry>,
    trades: u64,
}

impl LobbyRoom {
    /// Registrations every lobby starts from.
    pub fn registry_builder() -> RateLimitRegistryBuilder {
        RateLimitRegistry::builder()
            .enable_rate_limit("chat")
            .no_rate_limit_message("ping")
            .rate_limit_message(
                "trade",
                MessageRateLimitConfig::new()
                    .messages_per_second(0.5)
                    .burst_size(1),
            )
    }

    pub fn new(registry: Arc<RateLimitRegistry>) -> Self {
        Self {
            players: HashMap::new(),
            registry,
            trades: 0,
        }
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Number of trades accepted so far.
    pub fn trades(&self) -> u64 {
        self.trades
    }

    fn send_safe(player: &SharedPlayer, message: OutgoingMessage, context: &str) {
        if let Err(e) = player.send(message) {
            warn!(player = %player.id(), error = %e, "Failed to send {}", context);
        }
    }

    fn broadcast(&self, message: OutgoingMessage, exclude: Option<&PlayerId>) {
        let mut delivered = 0;
        for (id, player) in &self.players {
            if Some(id) == exclude {
                continue;
            }
            Self::send_safe(player, message.clone(), &message.message_type);
            delivered += 1;
        }
        debug!(message_type = %message.message_type, delivered, "Broadcast to lobby");
    }
}

impl Default for LobbyRoom {
    fn default() -> Self {
        Self::new(Arc::new(Self::registry_builder().build()))
    }
}

impl Room for LobbyRoom {
    fn on_join(&mut self, player: &SharedPlayer) {
        self.players.insert(player.id().clone(), player.clone());
        Self::send_safe(
            player,
            OutgoingMessage::new(
                "welcome",
                json!({ "player_id": player.id(), "players": self.players.len() }),
            ),
            "welcome",
        );
        self.broadcast(
            OutgoingMessage::new("joined", json!({ "player_id": player.id() })),
            Some(player.id()),
        );
    }

    fn handle_message(&mut self, player: &SharedPlayer, message: IncomingMessage) {
        match message.message_type.as_str() {
            "chat" => self.broadcast(
                OutgoingMessage::new(
                    "chat",
                    json!({ "from": player.id(), "text": message.data }),
                ),
                None,
            ),
            "ping" => Self::send_safe(player, OutgoingMessage::new("pong", message.data), "pong"),
            "trade" => {
                self.trades += 1;
                Self::send_safe(
                    player,
                    OutgoingMessage::new("trade_ack", json!({ "trade": self.trades })),
                    "trade_ack",
                );
            }
            other => {
                debug!(player = %player.id(), message_type = %other, "Unknown message type");
                Self::send_safe(
                    player,
                    OutgoingMessage::error(format!("unknown message type: {}", other)),
                    "error",
                );
            }
        }
    }

    fn on_leave(&mut self, player: &SharedPlayer) {
        if self.players.remove(player.id()).is_some() {
            self.broadcast(
                OutgoingMessage::new("left", json!({ "player_id": player.id() })),
                None,
            );
        }
    }

    fn dispose(&mut self) {
        for (_, player) in self.players.drain() {
            player.leave();
        }
    }
}

impl RateLimitPolicy for LobbyRoom {
    fn rate_limit_registry(&self) -> Arc<RateLimitRegistry> {
        self.registry.clone()
    }

    fn on_rate_limited(
        &mut self,
        player: &SharedPlayer,
        message_type: &str,
        result: &RateLimitResult,
    ) {
        Self::send_safe(
            player,
            OutgoingMessage::new(
                "rate_limited",
                json!({
                    "message_type": message_type,
                    "retry_after_ms": result.retry_after_ms,
                }),
            ),
            "rate_limited",
        );
    }
}
