//! Common types used throughout the matchmaking service

use crate::utils::average_rank;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use uuid::Uuid;

/// Stable player identity
pub type SteamId = String;

/// Unique identifier for lobbies
pub type LobbyId = Uuid;

/// Unique identifier for ready checks
pub type ConfirmationId = Uuid;

/// Unique identifier for created matches
pub type MatchId = Uuid;

/// Unique identifier for one side of a created match
pub type LineupId = Uuid;

/// Network/geographic partition, e.g. "na" or "eu-west"
pub type Region = String;

/// Kind of match a lobby queues for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Duel,
    Wingman,
    Competitive,
}

impl MatchType {
    /// Every match type the service queues for
    pub const ALL: [MatchType; 3] = [MatchType::Duel, MatchType::Wingman, MatchType::Competitive];

    /// Total number of players a match of this type needs
    pub fn required_players(self) -> usize {
        match self {
            MatchType::Duel => 2,
            MatchType::Wingman => 4,
            MatchType::Competitive => 10,
        }
    }

    /// Number of players on each side
    pub fn team_size(self) -> usize {
        self.required_players() / 2
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MatchType::Duel => "duel",
            MatchType::Wingman => "wingman",
            MatchType::Competitive => "competitive",
        }
    }
}

impl std::fmt::Display for MatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MatchType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "duel" => Ok(MatchType::Duel),
            "wingman" => Ok(MatchType::Wingman),
            "competitive" => Ok(MatchType::Competitive),
            other => Err(format!("unknown match type: {}", other)),
        }
    }
}

/// A queued player and their rank for the current pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbyPlayer {
    pub steam_id: SteamId,
    pub rank: f64,
}

impl LobbyPlayer {
    pub fn new(steam_id: impl Into<SteamId>, rank: f64) -> Self {
        Self {
            steam_id: steam_id.into(),
            rank,
        }
    }
}

/// Snapshot of a lobby as read from the lobby registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbyDetails {
    pub lobby_id: LobbyId,
    pub match_type: MatchType,
    pub regions: Vec<Region>,
    pub players: Vec<LobbyPlayer>,
    pub avg_rank: f64,
    pub joined_at: DateTime<Utc>,
}

impl LobbyDetails {
    /// Build a snapshot, deriving the average rank from the players
    pub fn new(
        lobby_id: LobbyId,
        match_type: MatchType,
        regions: Vec<Region>,
        players: Vec<LobbyPlayer>,
        joined_at: DateTime<Utc>,
    ) -> Self {
        let avg_rank = average_rank(&players);
        Self {
            lobby_id,
            match_type,
            regions,
            players,
            avg_rank,
            joined_at,
        }
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn accepts_region(&self, region: &str) -> bool {
        self.regions.iter().any(|r| r == region)
    }

    /// Seconds this lobby has been queued at `now` (never negative)
    pub fn wait_seconds(&self, now: DateTime<Utc>) -> f64 {
        let millis = (now - self.joined_at).num_milliseconds().max(0);
        millis as f64 / 1000.0
    }

    pub fn steam_ids(&self) -> Vec<SteamId> {
        self.players.iter().map(|p| p.steam_id.clone()).collect()
    }
}

/// One side of a proposed match
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub players: Vec<LobbyPlayer>,
    pub lobbies: Vec<LobbyId>,
    pub avg_rank: f64,
}

impl Team {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Average rank this team would have after absorbing `lobby`
    pub fn avg_rank_with(&self, lobby: &LobbyDetails) -> f64 {
        let total: f64 = self.players.iter().map(|p| p.rank).sum::<f64>()
            + lobby.players.iter().map(|p| p.rank).sum::<f64>();
        let count = self.players.len() + lobby.players.len();
        if count == 0 {
            0.0
        } else {
            total / count as f64
        }
    }

    /// Move every member of `lobby` onto this team
    pub fn absorb(&mut self, lobby: &LobbyDetails) {
        self.players.extend(lobby.players.iter().cloned());
        if !self.lobbies.contains(&lobby.lobby_id) {
            self.lobbies.push(lobby.lobby_id);
        }
        self.avg_rank = average_rank(&self.players);
    }

    /// Add a single player contributed by `lobby_id`
    pub fn push_player(&mut self, player: LobbyPlayer, lobby_id: LobbyId) {
        self.players.push(player);
        if !self.lobbies.contains(&lobby_id) {
            self.lobbies.push(lobby_id);
        }
        self.avg_rank = average_rank(&self.players);
    }

    pub fn steam_ids(&self) -> Vec<SteamId> {
        self.players.iter().map(|p| p.steam_id.clone()).collect()
    }

    pub fn contains_player(&self, steam_id: &str) -> bool {
        self.players.iter().any(|p| p.steam_id == steam_id)
    }
}

/// A persisted ready check between two proposed teams
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Confirmation {
    pub id: ConfirmationId,
    pub region: Region,
    pub match_type: MatchType,
    pub team1: Team,
    pub team2: Team,
    pub lobby_ids: Vec<LobbyId>,
    pub expires_at: DateTime<Utc>,
    pub match_id: Option<MatchId>,
    pub created_at: DateTime<Utc>,
}

impl Confirmation {
    pub fn expected_players(&self) -> usize {
        self.team1.len() + self.team2.len()
    }

    pub fn contains_player(&self, steam_id: &str) -> bool {
        self.team1.contains_player(steam_id) || self.team2.contains_player(steam_id)
    }

    pub fn steam_ids(&self) -> Vec<SteamId> {
        let mut ids = self.team1.steam_ids();
        ids.extend(self.team2.steam_ids());
        ids
    }

    /// Both teams together hold exactly the required count with no overlap
    pub fn teams_are_valid(&self) -> bool {
        let team1: HashSet<&str> = self.team1.players.iter().map(|p| p.steam_id.as_str()).collect();
        let disjoint = self
            .team2
            .players
            .iter()
            .all(|p| !team1.contains(p.steam_id.as_str()));
        disjoint && self.expected_players() == self.match_type.required_players()
    }
}

/// Confirmation plus its live acknowledgment state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationDetails {
    pub confirmation: Confirmation,
    pub confirmed: Vec<SteamId>,
    pub expected: usize,
}

/// Lifecycle state reported in confirmation broadcasts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationStatus {
    Pending,
    Finalized,
    Cancelled,
}

impl ConfirmationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfirmationStatus::Pending => "pending",
            ConfirmationStatus::Finalized => "finalized",
            ConfirmationStatus::Cancelled => "cancelled",
        }
    }
}

/// Broadcast after every queue change for a (type, region) pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueCounts {
    pub match_type: MatchType,
    pub region: Region,
    pub lobbies: usize,
    pub timestamp: DateTime<Utc>,
}

/// Broadcast whenever a ready check changes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationUpdate {
    pub confirmation_id: ConfirmationId,
    pub match_type: MatchType,
    pub region: Region,
    pub status: ConfirmationStatus,
    pub confirmed: usize,
    pub expected: usize,
    pub expires_at: DateTime<Utc>,
    pub match_id: Option<MatchId>,
    pub timestamp: DateTime<Utc>,
}

/// Live client notification for a single lobby
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbyUpdate {
    pub lobby_id: LobbyId,
    pub queued: bool,
    pub confirmation_id: Option<ConfirmationId>,
    pub timestamp: DateTime<Utc>,
}

/// Emitted once a match has been created and marked live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchLive {
    pub match_id: MatchId,
    pub match_type: MatchType,
    pub region: Region,
    pub lineup1: Vec<SteamId>,
    pub lineup2: Vec<SteamId>,
    pub timestamp: DateTime<Utc>,
}

/// Union type for all outbound events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BroadcastEvent {
    QueueCounts(QueueCounts),
    ConfirmationUpdate(ConfirmationUpdate),
    LobbyUpdate(LobbyUpdate),
    MatchLive(MatchLive),
}

/// Inbound commands accepted over AMQP
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MatchmakingCommand {
    AddLobby {
        lobby_id: LobbyId,
    },
    LeaveQueue {
        lobby_id: LobbyId,
    },
    Matchmake {
        match_type: MatchType,
        region: Region,
    },
    ConfirmPlayer {
        confirmation_id: ConfirmationId,
        steam_id: SteamId,
    },
    CancelMatchmaking {
        confirmation_id: ConfirmationId,
        has_match: bool,
    },
    CancelMatchmakingByMatch {
        match_id: MatchId,
    },
}
