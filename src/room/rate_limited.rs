//! Wrapping a room with per-player message rate limiting.

use std::sync::{Arc, OnceLock};

use tracing::debug;

use super::gate::RateLimitGate;
use super::{IncomingMessage, PlayerId, Room, SharedPlayer};
use crate::ratelimit::{
    Clock, RateLimitConfig, RateLimitContext, RateLimitRegistry, RateLimitResult,
    RateLimitStrategy,
};

/// Rate limit hooks a room type can provide.
///
/// Both methods have defaults: no per-message metadata, and silently dropping
/// denied messages.
pub trait RateLimitPolicy: Room {
    /// Message metadata shared by every room of this type.
    fn rate_limit_registry(&self) -> Arc<RateLimitRegistry> {
        static EMPTY: OnceLock<Arc<RateLimitRegistry>> = OnceLock::new();
        EMPTY.get_or_init(Arc::default).clone()
    }

    /// Called instead of the handler when a message is denied.
    fn on_rate_limited(
        &mut self,
        _player: &SharedPlayer,
        _message_type: &str,
        _result: &RateLimitResult,
    ) {
    }
}

/// A room whose message dispatch goes through a [`RateLimitGate`] first.
///
/// The wrapped room is unchanged; admitted messages reach its handler exactly
/// as they arrived, denied ones never do. Once disposed, the room admits
/// nothing and turns joining players away.
#[derive(Debug)]
pub struct RateLimitedRoom<R> {
    inner: R,
    gate: RateLimitGate,
    disposed: bool,
}

/// Wrap `room` with rate limiting using `config` as the room default.
pub fn with_rate_limit<R: RateLimitPolicy>(room: R, config: RateLimitConfig) -> RateLimitedRoom<R> {
    RateLimitedRoom::new(room, config)
}

impl<R: RateLimitPolicy> RateLimitedRoom<R> {
    pub fn new(room: R, config: RateLimitConfig) -> Self {
        let gate = RateLimitGate::new(config, room.rate_limit_registry());
        Self {
            inner: room,
            gate,
            disposed: false,
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Replace the time source used for admission checks.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.gate = self.gate.with_clock(clock);
        self
    }

    /// The room-level strategy built from the room default config.
    pub fn rate_limit_strategy(&self) -> &dyn RateLimitStrategy {
        self.gate.rate_limit_strategy()
    }

    /// The rate limit context of `player_id`, or `None` before its first message.
    pub fn get_rate_limit_context(&self, player_id: &PlayerId) -> Option<&dyn RateLimitContext> {
        self.gate
            .context(player_id)
            .map(|context| context as &dyn RateLimitContext)
    }

    pub fn gate(&self) -> &RateLimitGate {
        &self.gate
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut R {
        &mut self.inner
    }
}

impl<R: RateLimitPolicy> Room for RateLimitedRoom<R> {
    fn on_join(&mut self, player: &SharedPlayer) {
        if self.disposed {
            debug!(player = %player.id(), "Join after dispose, sending player away");
            player.leave();
            return;
        }
        self.inner.on_join(player);
    }

    fn handle_message(&mut self, player: &SharedPlayer, message: IncomingMessage) {
        if self.disposed {
            debug!(
                player = %player.id(),
                message_type = %message.message_type,
                "Message after dispose dropped"
            );
            return;
        }

        let result = self.gate.check_message(player.id(), &message.message_type);
        if !result.allowed {
            debug!(
                player = %player.id(),
                message_type = %message.message_type,
                retry_after_ms = result.retry_after_ms,
                "Message rate limited"
            );
            self.inner
                .on_rate_limited(player, &message.message_type, &result);
            return;
        }

        self.inner.handle_message(player, message);
    }

    fn on_leave(&mut self, player: &SharedPlayer) {
        if self.disposed {
            return;
        }
        self.inner.on_leave(player);
        self.gate.remove_player(player.id());
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.gate.dispose();
        self.inner.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{ManualClock, MessageRateLimitConfig, StrategyKind};
    use crate::room::testing::RecordingPlayer;
    use serde_json::json;

    /// Room that records which messages reached it.
    #[derive(Debug, Default)]
    struct TestRoom {
        handled: Vec<String>,
        limited: Vec<(String, u64)>,
        disposed: bool,
    }

    fn test_registry() -> Arc<RateLimitRegistry> {
        static REGISTRY: OnceLock<Arc<RateLimitRegistry>> = OnceLock::new();
        REGISTRY
            .get_or_init(|| {
                Arc::new(
                    RateLimitRegistry::builder()
                        .rate_limit_message("trade", MessageRateLimitConfig::new().burst_size(1))
                        .no_rate_limit_message("ping")
                        .build(),
                )
            })
            .clone()
    }

    impl Room for TestRoom {
        fn handle_message(&mut self, _player: &SharedPlayer, message: IncomingMessage) {
            self.handled.push(message.message_type);
        }

        fn dispose(&mut self) {
            self.disposed = true;
        }
    }

    impl RateLimitPolicy for TestRoom {
        fn rate_limit_registry(&self) -> Arc<RateLimitRegistry> {
            test_registry()
        }

        fn on_rate_limited(
            &mut self,
            _player: &SharedPlayer,
            message_type: &str,
            result: &RateLimitResult,
        ) {
            self.limited
                .push((message_type.to_string(), result.retry_after_ms));
        }
    }

    /// Room relying on every default hook.
    #[derive(Debug, Default)]
    struct PlainRoom {
        handled: usize,
    }

    impl Room for PlainRoom {
        fn handle_message(&mut self, _player: &SharedPlayer, _message: IncomingMessage) {
            self.handled += 1;
        }
    }

    impl RateLimitPolicy for PlainRoom {}

    fn message(message_type: &str) -> IncomingMessage {
        IncomingMessage::new(message_type, json!(null))
    }

    fn player(id: &str) -> SharedPlayer {
        RecordingPlayer::new(id)
    }

    #[test]
    fn test_default_strategy_names() {
        let room = with_rate_limit(PlainRoom::default(), RateLimitConfig::default());
        assert_eq!(room.rate_limit_strategy().name(), "token-bucket");

        let room = with_rate_limit(
            PlainRoom::default(),
            RateLimitConfig::with_strategy(StrategyKind::SlidingWindow),
        );
        assert_eq!(room.rate_limit_strategy().name(), "sliding-window");

        let room = with_rate_limit(
            PlainRoom::default(),
            RateLimitConfig::with_strategy(StrategyKind::FixedWindow),
        );
        assert_eq!(room.rate_limit_strategy().name(), "fixed-window");
    }

    #[test]
    fn test_denied_messages_skip_handler() {
        let clock = ManualClock::new(0);
        let config = RateLimitConfig {
            messages_per_second: 5.0,
            burst_size: Some(5),
            ..RateLimitConfig::default()
        };
        let mut room = with_rate_limit(TestRoom::default(), config).with_clock(Arc::new(clock.clone()));
        let alice = player("alice");

        for _ in 0..6 {
            room.handle_message(&alice, message("chat"));
        }
        assert_eq!(room.inner().handled.len(), 5);
        assert_eq!(room.inner().limited, vec![("chat".to_string(), 200)]);

        clock.advance(200);
        room.handle_message(&alice, message("chat"));
        assert_eq!(room.inner().handled.len(), 6);
    }

    #[test]
    fn test_override_isolation_through_room() {
        let clock = ManualClock::new(0);
        let mut room = with_rate_limit(TestRoom::default(), RateLimitConfig::default())
            .with_clock(Arc::new(clock));
        let alice = player("alice");

        room.handle_message(&alice, message("trade"));
        room.handle_message(&alice, message("trade"));
        room.handle_message(&alice, message("chat"));

        assert_eq!(room.inner().handled, vec!["trade", "chat"]);
        assert_eq!(room.inner().limited.len(), 1);
        assert_eq!(room.inner().limited[0].0, "trade");
    }

    #[test]
    fn test_exempt_messages_bypass_limits() {
        let config = RateLimitConfig {
            messages_per_second: 1.0,
            burst_size: Some(1),
            ..RateLimitConfig::default()
        };
        let mut room = with_rate_limit(TestRoom::default(), config)
            .with_clock(Arc::new(ManualClock::new(0)));
        let alice = player("alice");

        for _ in 0..1000 {
            room.handle_message(&alice, message("ping"));
        }
        assert_eq!(room.inner().handled.len(), 1000);
        assert!(room.inner().limited.is_empty());
    }

    #[test]
    fn test_context_lifecycle() {
        let mut room = with_rate_limit(TestRoom::default(), RateLimitConfig::default());
        let alice = player("alice");

        room.on_join(&alice);
        assert!(room.get_rate_limit_context(alice.id()).is_none());

        room.handle_message(&alice, message("chat"));
        let context = room.get_rate_limit_context(alice.id()).unwrap();
        assert_eq!(context.player_id(), "alice");

        room.on_leave(&alice);
        assert!(room.get_rate_limit_context(alice.id()).is_none());
    }

    #[test]
    fn test_dispose_empty_room() {
        let mut room = with_rate_limit(TestRoom::default(), RateLimitConfig::default());
        room.dispose();
        assert!(room.inner().disposed);
    }

    #[test]
    fn test_dispose_clears_contexts() {
        let mut room = with_rate_limit(PlainRoom::default(), RateLimitConfig::default());
        let alice = player("alice");
        let bob = player("bob");
        room.handle_message(&alice, message("chat"));
        room.handle_message(&bob, message("chat"));
        assert_eq!(room.gate().context_count(), 2);

        room.dispose();
        assert_eq!(room.gate().context_count(), 0);
        assert_eq!(room.inner().handled, 2);
    }

    #[test]
    fn test_disposed_room_admits_nothing() {
        let mut room = with_rate_limit(TestRoom::default(), RateLimitConfig::default());
        let recorder = RecordingPlayer::new("alice");
        let alice: SharedPlayer = recorder.clone();

        room.dispose();
        assert!(room.is_disposed());

        room.handle_message(&alice, message("chat"));
        assert!(room.inner().handled.is_empty());
        assert_eq!(room.gate().context_count(), 0);

        room.on_join(&alice);
        assert!(*recorder.left.lock());

        room.dispose();
        assert!(room.inner().disposed);
    }

    #[test]
    fn test_default_denial_is_silent() {
        let config = RateLimitConfig {
            burst_size: Some(1),
            ..RateLimitConfig::default()
        };
        let mut room = with_rate_limit(PlainRoom::default(), config)
            .with_clock(Arc::new(ManualClock::new(0)));
        let recorder = RecordingPlayer::new("alice");
        let alice: SharedPlayer = recorder.clone();

        room.handle_message(&alice, message("chat"));
        room.handle_message(&alice, message("chat"));

        assert_eq!(room.inner().handled, 1);
        assert!(recorder.sent_types().is_empty());
    }
}
