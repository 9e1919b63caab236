//! Roomgate - per-player message rate limiting for multiplayer rooms
//!
//! A room server dispatches every player message to a message handler. This
//! crate puts an admission check in front of that dispatch: each player gets
//! a private budget per room, message types can be exempt or carry their own
//! stricter allowance, and denied messages never reach the handler.
//!
//! The limiting itself lives in [`ratelimit`]; [`room`] defines the room and
//! player seams and the [`room::RateLimitedRoom`] wrapper; [`server`] hosts a
//! [`lobby::LobbyRoom`] over line-delimited JSON.

pub mod config;
pub mod error;
pub mod lobby;
pub mod ratelimit;
pub mod room;
pub mod server;
