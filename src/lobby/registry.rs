//! Lobby registry traits and implementations
//!
//! The registry owns lobby detail snapshots and the lobby → confirmation
//! backreference. Lobbies are created by the player-facing services; the
//! matchmaking core only reads them, links them to ready checks and drops
//! them when a ready check fails.

use crate::amqp::publisher::EventPublisher;
use crate::error::{MatchmakingError, Result};
use crate::store::{keys, CoordinationStore};
use crate::types::{ConfirmationId, LobbyDetails, LobbyId, LobbyUpdate};
use crate::utils::current_timestamp;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Source of truth for lobby details and confirmation backreferences
#[async_trait]
pub trait LobbyRegistry: Send + Sync {
    /// Fresh snapshot of a lobby; `None` when the lobby no longer exists
    async fn get_lobby_details(&self, lobby_id: LobbyId) -> Result<Option<LobbyDetails>>;

    async fn set_confirmation_id(
        &self,
        lobby_id: LobbyId,
        confirmation_id: ConfirmationId,
    ) -> Result<()>;

    async fn clear_confirmation_id(&self, lobby_id: LobbyId) -> Result<()>;

    async fn get_confirmation_id(&self, lobby_id: LobbyId) -> Result<Option<ConfirmationId>>;

    /// Push the lobby's current queue state to its connected clients
    async fn push_queue_update(&self, lobby_id: LobbyId) -> Result<()>;

    /// Remove the lobby entirely; its members must queue again from scratch
    async fn delete_lobby(&self, lobby_id: LobbyId) -> Result<()>;
}

/// Registry that keeps lobby snapshots in the coordination store
pub struct StoreLobbyRegistry {
    store: Arc<dyn CoordinationStore>,
    publisher: Arc<dyn EventPublisher>,
}

impl StoreLobbyRegistry {
    pub fn new(store: Arc<dyn CoordinationStore>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { store, publisher }
    }

    /// Create or replace a lobby snapshot
    pub async fn upsert_lobby(&self, lobby: &LobbyDetails) -> Result<()> {
        let json = serde_json::to_string(lobby).map_err(|e| MatchmakingError::InternalError {
            message: format!("Failed to serialize lobby {}: {}", lobby.lobby_id, e),
        })?;
        self.store.set(&keys::lobby(lobby.lobby_id), &json, None).await?;
        debug!(
            "Stored lobby {} ({} players, {})",
            lobby.lobby_id,
            lobby.player_count(),
            lobby.match_type
        );
        Ok(())
    }
}

#[async_trait]
impl LobbyRegistry for StoreLobbyRegistry {
    async fn get_lobby_details(&self, lobby_id: LobbyId) -> Result<Option<LobbyDetails>> {
        let Some(json) = self.store.get(&keys::lobby(lobby_id)).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<LobbyDetails>(&json) {
            Ok(lobby) => Ok(Some(lobby)),
            Err(e) => {
                warn!("Discarding unreadable lobby record {}: {}", lobby_id, e);
                Ok(None)
            }
        }
    }

    async fn set_confirmation_id(
        &self,
        lobby_id: LobbyId,
        confirmation_id: ConfirmationId,
    ) -> Result<()> {
        self.store
            .set(
                &keys::lobby_confirmation(lobby_id),
                &confirmation_id.to_string(),
                None,
            )
            .await
    }

    async fn clear_confirmation_id(&self, lobby_id: LobbyId) -> Result<()> {
        self.store.delete(&keys::lobby_confirmation(lobby_id)).await?;
        Ok(())
    }

    async fn get_confirmation_id(&self, lobby_id: LobbyId) -> Result<Option<ConfirmationId>> {
        let value = self.store.get(&keys::lobby_confirmation(lobby_id)).await?;
        Ok(value.and_then(|id| id.parse().ok()))
    }

    async fn push_queue_update(&self, lobby_id: LobbyId) -> Result<()> {
        let queued = self
            .store
            .set_contains(&keys::queue_members(), &lobby_id.to_string())
            .await?;
        let confirmation_id = self.get_confirmation_id(lobby_id).await?;
        let update = LobbyUpdate {
            lobby_id,
            queued,
            confirmation_id,
            timestamp: current_timestamp(),
        };
        if let Err(e) = self.publisher.publish_lobby_update(update).await {
            warn!("Failed to push queue update for lobby {}: {}", lobby_id, e);
        }
        Ok(())
    }

    async fn delete_lobby(&self, lobby_id: LobbyId) -> Result<()> {
        self.store.delete(&keys::lobby(lobby_id)).await?;
        self.store.delete(&keys::lobby_confirmation(lobby_id)).await?;
        debug!("Deleted lobby {}", lobby_id);
        Ok(())
    }
}
