//! Error types for Roomgate.
//!
//! Rate-limit denials are not errors; they are reported through
//! [`RateLimitResult`](crate::ratelimit::RateLimitResult). The variants here
//! cover configuration loading and the demo server.

use thiserror::Error;

use crate::room::PlayerId;

/// Main error type for Roomgate operations.
#[derive(Error, Debug)]
pub enum RoomgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed JSON on the wire
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The player's connection has already gone away
    #[error("Player {0} is no longer connected")]
    PlayerGone(PlayerId),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Roomgate operations.
pub type Result<T> = std::result::Result<T, RoomgateError>;
