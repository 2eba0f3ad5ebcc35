//! Error types for the presence layer

use thiserror::Error;

/// Errors surfaced by rooms, providers and the awareness wire format
#[derive(Error, Debug)]
pub enum PresenceError {
    /// A room was looked up outside of an active provider or session
    #[error("no active presence session")]
    NoActiveSession,

    /// The room has already been destroyed
    #[error("room has been destroyed")]
    Destroyed,

    /// Presence payloads must serialize to a JSON object
    #[error("presence must serialize to a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for presence operations
pub type Result<T> = std::result::Result<T, PresenceError>;
