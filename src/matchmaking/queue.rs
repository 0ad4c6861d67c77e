//! Rank-ordered lobby queues per (type, region)
//!
//! A lobby is inserted into the queue of every region it accepts and into a
//! global membership set. Its placement is recorded so removal can clean up
//! every queue without re-reading the lobby.

use crate::error::{MatchmakingError, Result};
use crate::store::{keys, CoordinationStore};
use crate::types::{LobbyDetails, LobbyId, MatchType, Region};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Queues a lobby was inserted into
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuePlacement {
    pub match_type: MatchType,
    pub regions: Vec<Region>,
}

pub struct LobbyQueue {
    store: Arc<dyn CoordinationStore>,
}

impl LobbyQueue {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    /// Insert a lobby into every region queue it accepts; re-inserting is a no-op
    pub async fn enqueue(&self, lobby: &LobbyDetails) -> Result<QueuePlacement> {
        if lobby.regions.is_empty() {
            return Err(MatchmakingError::InvalidCommand {
                reason: format!("Lobby {} accepts no regions", lobby.lobby_id),
            }
            .into());
        }

        let member = lobby.lobby_id.to_string();
        let placement = QueuePlacement {
            match_type: lobby.match_type,
            regions: lobby.regions.clone(),
        };
        let json =
            serde_json::to_string(&placement).map_err(|e| MatchmakingError::InternalError {
                message: format!("Failed to serialize placement for {}: {}", member, e),
            })?;

        // Placement first, so a concurrent remove always finds what to undo.
        self.store
            .set(&keys::queue_placement(lobby.lobby_id), &json, None)
            .await?;
        for region in &lobby.regions {
            self.store
                .sorted_add(&keys::queue(lobby.match_type, region), &member, lobby.avg_rank)
                .await?;
        }
        self.store.set_add(&keys::queue_members(), &member).await?;

        debug!(
            "Queued lobby {} for {} in {:?} at rank {:.1}",
            lobby.lobby_id, lobby.match_type, lobby.regions, lobby.avg_rank
        );
        Ok(placement)
    }

    /// Remove a lobby from every queue; `None` when it was not queued
    pub async fn remove(&self, lobby_id: LobbyId) -> Result<Option<QueuePlacement>> {
        let member = lobby_id.to_string();
        let placement_key = keys::queue_placement(lobby_id);

        let placement = match self.store.get(&placement_key).await? {
            Some(json) => match serde_json::from_str::<QueuePlacement>(&json) {
                Ok(placement) => Some(placement),
                Err(e) => {
                    warn!("Unreadable queue placement for lobby {}: {}", lobby_id, e);
                    None
                }
            },
            None => None,
        };

        if let Some(placement) = &placement {
            for region in &placement.regions {
                self.store
                    .sorted_remove(&keys::queue(placement.match_type, region), &member)
                    .await?;
            }
        }
        let was_member = self.store.set_remove(&keys::queue_members(), &member).await?;
        self.store.delete(&placement_key).await?;

        if was_member {
            debug!("Removed lobby {} from queue", lobby_id);
        }
        Ok(placement.filter(|_| was_member))
    }

    pub async fn contains(&self, lobby_id: LobbyId) -> Result<bool> {
        self.store
            .set_contains(&keys::queue_members(), &lobby_id.to_string())
            .await
    }

    pub async fn count(&self, match_type: MatchType, region: &str) -> Result<usize> {
        self.store.sorted_len(&keys::queue(match_type, region)).await
    }

    /// Total lobbies queued anywhere
    pub async fn total(&self) -> Result<usize> {
        self.store.set_len(&keys::queue_members()).await
    }

    /// Lobby ids queued for (type, region), highest rank first
    pub async fn snapshot(&self, match_type: MatchType, region: &str) -> Result<Vec<LobbyId>> {
        let members = self
            .store
            .sorted_members_desc(&keys::queue(match_type, region))
            .await?;
        let mut ids = Vec::with_capacity(members.len());
        for (member, _) in members {
            match member.parse() {
                Ok(id) => ids.push(id),
                Err(_) => warn!("Skipping malformed queue member {}", member),
            }
        }
        Ok(ids)
    }
}
