//! Utility functions for the matchmaking service

use crate::types::LobbyPlayer;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Duration;
use uuid::Uuid;

/// Generate a new unique lobby ID
pub fn generate_lobby_id() -> Uuid {
    Uuid::new_v4()
}

/// Generate a new unique confirmation ID
pub fn generate_confirmation_id() -> Uuid {
    Uuid::new_v4()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Mean rank of a set of players, 0.0 when empty
pub fn average_rank(players: &[LobbyPlayer]) -> f64 {
    if players.is_empty() {
        return 0.0;
    }
    players.iter().map(|p| p.rank).sum::<f64>() / players.len() as f64
}

/// Calculate the absolute difference between two ranks
pub fn rank_difference(rank1: f64, rank2: f64) -> f64 {
    (rank1 - rank2).abs()
}

/// Uniformly random delay in `[min, max]` whole seconds
pub fn random_delay(min_seconds: u64, max_seconds: u64) -> Duration {
    if max_seconds <= min_seconds {
        return Duration::from_secs(min_seconds);
    }
    let secs = rand::thread_rng().gen_range(min_seconds..=max_seconds);
    Duration::from_secs(secs)
}
