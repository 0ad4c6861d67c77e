//! Two-team filling with per-lobby claims
//!
//! Lobbies are walked in group order. Each one is claimed before it is
//! placed; a lobby another pass holds is skipped and stays queued. Placement
//! keeps the two team averages converging as the teams fill.

use crate::error::{MatchmakingError, Result};
use crate::matchmaking::confirmation::ConfirmationManager;
use crate::matchmaking::locks::LockCoordinator;
use crate::matchmaking::queue::LobbyQueue;
use crate::types::{ConfirmationId, LobbyDetails, LobbyId, MatchType, Team};
use crate::utils::rank_difference;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// What a balancing run produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BalanceOutcome {
    pub confirmations: Vec<ConfirmationId>,
    /// Players that were considered but did not end up in a confirmation
    pub unplaced: usize,
}

impl BalanceOutcome {
    pub fn merge(&mut self, other: BalanceOutcome) {
        self.confirmations.extend(other.confirmations);
        self.unplaced += other.unplaced;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    First,
    Second,
}

/// Teams after one pass over the working set
struct Filled {
    team1: Team,
    team2: Team,
    /// Lobbies left over because the teams had no room for them
    leftovers: Vec<LobbyDetails>,
}

pub struct TeamBalancer {
    locks: Arc<LockCoordinator>,
    queue: Arc<LobbyQueue>,
    confirmations: Arc<ConfirmationManager>,
}

impl TeamBalancer {
    pub fn new(
        locks: Arc<LockCoordinator>,
        queue: Arc<LobbyQueue>,
        confirmations: Arc<ConfirmationManager>,
    ) -> Self {
        Self {
            locks,
            queue,
            confirmations,
        }
    }

    /// Fill as many confirmations as the group allows
    pub async fn balance(
        &self,
        region: &str,
        match_type: MatchType,
        group: Vec<LobbyDetails>,
    ) -> Result<BalanceOutcome> {
        let required = match_type.required_players();
        let mut outcome = BalanceOutcome::default();
        let mut remaining = group;

        while !remaining.is_empty() {
            let available: usize = remaining.iter().map(LobbyDetails::player_count).sum();
            if available < required {
                outcome.unplaced += available;
                break;
            }

            let mut acquired: Vec<LobbyId> = Vec::new();
            let filled = match self.fill(match_type, remaining, &mut acquired).await {
                Ok(filled) => filled,
                Err(e) => {
                    self.release(&acquired).await;
                    return Err(e);
                }
            };

            let placed = filled.team1.len() + filled.team2.len();
            if placed == 0 {
                outcome.unplaced += filled
                    .leftovers
                    .iter()
                    .map(LobbyDetails::player_count)
                    .sum::<usize>();
                break;
            }

            if placed < required {
                debug!(
                    "Only {} of {} players placed for {} in {}",
                    placed, required, match_type, region
                );
                self.release(&acquired).await;
                outcome.unplaced += placed;
                remaining = filled.leftovers;
                continue;
            }

            match self
                .confirmations
                .create_confirmation(region, match_type, filled.team1, filled.team2)
                .await
            {
                Ok(confirmation_id) => {
                    outcome.confirmations.push(confirmation_id);
                    remaining = filled.leftovers;
                }
                Err(e) => {
                    self.release(&acquired).await;
                    if matches!(
                        e.downcast_ref::<MatchmakingError>(),
                        Some(MatchmakingError::MissingRegion { .. })
                    ) {
                        return Err(e);
                    }
                    error!(
                        "Could not open confirmation for {} in {}: {}",
                        match_type, region, e
                    );
                    outcome.unplaced += required
                        + filled
                            .leftovers
                            .iter()
                            .map(LobbyDetails::player_count)
                            .sum::<usize>();
                    break;
                }
            }
        }

        Ok(outcome)
    }

    /// Split a lobby that fills a match on its own into two sub-teams
    pub async fn match_full_lobby(
        &self,
        region: &str,
        lobby: LobbyDetails,
    ) -> Result<BalanceOutcome> {
        let match_type = lobby.match_type;
        let lobby_id = lobby.lobby_id;
        if !self.locks.acquire_lobby_lock(lobby_id).await? {
            return Ok(BalanceOutcome::default());
        }

        let result = async {
            if !self.queue.contains(lobby_id).await? {
                debug!("Full lobby {} left the queue before matching", lobby_id);
                return Ok::<Option<ConfirmationId>, anyhow::Error>(None);
            }
            let (team1, team2) = split_lobby(&lobby, match_type.team_size());
            let id = self
                .confirmations
                .create_confirmation(region, match_type, team1, team2)
                .await?;
            Ok(Some(id))
        }
        .await;

        match result {
            Ok(Some(confirmation_id)) => Ok(BalanceOutcome {
                confirmations: vec![confirmation_id],
                unplaced: 0,
            }),
            Ok(None) => {
                self.release(&[lobby_id]).await;
                Ok(BalanceOutcome::default())
            }
            Err(e) => {
                self.release(&[lobby_id]).await;
                if matches!(
                    e.downcast_ref::<MatchmakingError>(),
                    Some(MatchmakingError::MissingRegion { .. })
                ) {
                    return Err(e);
                }
                error!("Could not match full lobby {}: {}", lobby_id, e);
                Ok(BalanceOutcome {
                    confirmations: Vec::new(),
                    unplaced: lobby.player_count(),
                })
            }
        }
    }

    async fn fill(
        &self,
        match_type: MatchType,
        lobbies: Vec<LobbyDetails>,
        acquired: &mut Vec<LobbyId>,
    ) -> Result<Filled> {
        let team_size = match_type.team_size();
        let mut team1 = Team::new();
        let mut team2 = Team::new();
        let mut leftovers = Vec::new();

        for lobby in lobbies {
            let size = lobby.player_count();
            let room1 = team_size.saturating_sub(team1.len());
            let room2 = team_size.saturating_sub(team2.len());
            if size == 0 || (size > room1 && size > room2) {
                leftovers.push(lobby);
                continue;
            }

            if !self.locks.acquire_lobby_lock(lobby.lobby_id).await? {
                continue;
            }
            acquired.push(lobby.lobby_id);

            if !self.queue.contains(lobby.lobby_id).await? {
                debug!("Lobby {} left the queue mid-pass", lobby.lobby_id);
                self.locks.release_lobby_lock(lobby.lobby_id).await?;
                acquired.pop();
                continue;
            }

            match choose_side(&team1, &team2, &lobby, room1, room2) {
                Side::First => team1.absorb(&lobby),
                Side::Second => team2.absorb(&lobby),
            }
        }

        Ok(Filled {
            team1,
            team2,
            leftovers,
        })
    }

    async fn release(&self, lobby_ids: &[LobbyId]) {
        for lobby_id in lobby_ids {
            if let Err(e) = self.locks.release_lobby_lock(*lobby_id).await {
                warn!("Failed to release lock for lobby {}: {}", lobby_id, e);
            }
        }
    }
}

/// Pick the team a lobby joins; the caller guarantees at least one side has room
fn choose_side(team1: &Team, team2: &Team, lobby: &LobbyDetails, room1: usize, room2: usize) -> Side {
    let size = lobby.player_count();
    match (size <= room1, size <= room2) {
        (true, false) => return Side::First,
        (false, true) => return Side::Second,
        _ => {}
    }
    if team1.is_empty() {
        return Side::First;
    }
    if team2.is_empty() {
        return Side::Second;
    }

    let skew_if_first = rank_difference(team1.avg_rank_with(lobby), team2.avg_rank);
    let skew_if_second = rank_difference(team2.avg_rank_with(lobby), team1.avg_rank);
    if skew_if_first < skew_if_second {
        Side::First
    } else if skew_if_second < skew_if_first {
        Side::Second
    } else if team2.len() < team1.len() {
        Side::Second
    } else {
        Side::First
    }
}

/// Greedy split by descending rank into two teams of `team_size`
fn split_lobby(lobby: &LobbyDetails, team_size: usize) -> (Team, Team) {
    let mut players = lobby.players.clone();
    players.sort_by(|a, b| b.rank.total_cmp(&a.rank));

    let mut team1 = Team::new();
    let mut team2 = Team::new();
    let mut sum1 = 0.0;
    let mut sum2 = 0.0;
    for player in players {
        let to_first = if team1.len() >= team_size {
            false
        } else if team2.len() >= team_size {
            true
        } else {
            sum1 <= sum2
        };
        if to_first {
            sum1 += player.rank;
            team1.push_player(player, lobby.lobby_id);
        } else {
            sum2 += player.rank;
            team2.push_player(player, lobby.lobby_id);
        }
    }
    (team1, team2)
}
