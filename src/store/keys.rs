//! Key layout inside the coordination store

use crate::types::{ConfirmationId, LineupId, LobbyId, MatchId, MatchType};

const PREFIX: &str = "ready_room";

pub fn region_lock(region: &str) -> String {
    format!("{}:lock:region:{}", PREFIX, region)
}

pub fn lobby_lock(lobby_id: LobbyId) -> String {
    format!("{}:lock:lobby:{}", PREFIX, lobby_id)
}

/// Rank-ordered queue for one (type, region) pair
pub fn queue(match_type: MatchType, region: &str) -> String {
    format!("{}:queue:{}:{}", PREFIX, match_type, region)
}

/// Set of every lobby currently queued anywhere
pub fn queue_members() -> String {
    format!("{}:queue:members", PREFIX)
}

/// Where a queued lobby was inserted, so removal can find every queue
pub fn queue_placement(lobby_id: LobbyId) -> String {
    format!("{}:queue:placement:{}", PREFIX, lobby_id)
}

pub fn lobby(lobby_id: LobbyId) -> String {
    format!("{}:lobby:{}", PREFIX, lobby_id)
}

pub fn lobby_confirmation(lobby_id: LobbyId) -> String {
    format!("{}:lobby:{}:confirmation", PREFIX, lobby_id)
}

pub fn confirmation(confirmation_id: ConfirmationId) -> String {
    format!("{}:confirmation:{}", PREFIX, confirmation_id)
}

pub fn confirmation_acks(confirmation_id: ConfirmationId) -> String {
    format!("{}:confirmation:{}:confirmed", PREFIX, confirmation_id)
}

/// Claimed once by whichever of finalize or cancel gets there first
pub fn confirmation_terminal(confirmation_id: ConfirmationId) -> String {
    format!("{}:confirmation:{}:terminal", PREFIX, confirmation_id)
}

/// Set of confirmations still waiting on acknowledgments, across all workers
pub fn pending_confirmations() -> String {
    format!("{}:confirmations:pending", PREFIX)
}

/// Present until the ready check times out; its expiry is the deadline
pub fn confirmation_deadline(confirmation_id: ConfirmationId) -> String {
    format!("{}:confirmation:{}:deadline", PREFIX, confirmation_id)
}

pub fn match_confirmation(match_id: MatchId) -> String {
    format!("{}:match:{}:confirmation", PREFIX, match_id)
}

pub fn match_record(match_id: MatchId) -> String {
    format!("{}:match:{}", PREFIX, match_id)
}

pub fn lineup_match(lineup_id: LineupId) -> String {
    format!("{}:lineup:{}:match", PREFIX, lineup_id)
}
