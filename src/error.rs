//! Error types for the matchmaking service
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application. Lock contention is not an error: lock operations
//! report it as `Ok(false)`.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific matchmaking scenarios
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Invalid command: {reason}")]
    InvalidCommand { reason: String },

    #[error("Lobby vanished: {lobby_id}")]
    LobbyVanished { lobby_id: String },

    #[error("Confirmation not found: {confirmation_id}")]
    ConfirmationNotFound { confirmation_id: String },

    #[error("Player {steam_id} is not part of confirmation {confirmation_id}")]
    PlayerNotInConfirmation {
        confirmation_id: String,
        steam_id: String,
    },

    #[error("Match creation failed: {reason}")]
    MatchCreationFailed { reason: String },

    #[error("No region resolved for confirmation {confirmation_id}")]
    MissingRegion { confirmation_id: String },

    #[error("Coordination store error: {message}")]
    Store { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl MatchmakingError {
    /// Whether an error chain carries a match creation failure
    pub fn is_match_creation_failure(error: &anyhow::Error) -> bool {
        matches!(
            error.downcast_ref::<MatchmakingError>(),
            Some(MatchmakingError::MatchCreationFailed { .. })
        )
    }
}
