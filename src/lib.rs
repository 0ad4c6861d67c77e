//! Ready Room - region-sharded matchmaking for team games
//!
//! Lobbies queue per match type and region, are grouped by rank and wait
//! time, balanced into two teams and held in a timed ready check until every
//! player confirms. State lives in a shared coordination store so several
//! workers can matchmake against the same queues.

pub mod amqp;
pub mod config;
pub mod error;
pub mod game;
pub mod jobs;
pub mod lobby;
pub mod matchmaking;
pub mod metrics;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{MatchmakingError, Result};
pub use types::*;

pub use amqp::publisher::EventPublisher;
pub use lobby::{LobbyRegistry, StoreLobbyRegistry};
pub use matchmaking::{Collaborators, Matchmaker};
pub use store::{CoordinationStore, MemoryStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
