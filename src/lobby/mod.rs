//! Lobby registry access for the matchmaking service
//!
//! Lobbies are owned by the player-facing services; this module defines the
//! narrow interface the matchmaking core reads them through.

pub mod registry;

// Re-export commonly used types
pub use registry::{LobbyRegistry, StoreLobbyRegistry};
