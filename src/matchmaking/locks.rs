//! Advisory, TTL-bounded claims over regions and lobbies
//!
//! Claims are conditional writes with an expiry. Acquisition never blocks and
//! never retries; `Ok(false)` means another worker holds the claim. A holder
//! that dies simply lets its claim lapse.

use crate::error::Result;
use crate::store::{keys, CoordinationStore};
use crate::types::{ConfirmationId, LobbyId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

pub struct LockCoordinator {
    store: Arc<dyn CoordinationStore>,
    region_ttl: Duration,
    lobby_ttl: Duration,
    owner: String,
}

/// Claim value for lobbies held by an open ready check
fn confirmation_token(confirmation_id: ConfirmationId) -> String {
    format!("confirmation:{}", confirmation_id)
}

impl LockCoordinator {
    pub fn new(store: Arc<dyn CoordinationStore>, region_ttl: Duration, lobby_ttl: Duration) -> Self {
        Self {
            store,
            region_ttl,
            lobby_ttl,
            owner: Uuid::new_v4().to_string(),
        }
    }

    /// Token written into every claim this coordinator takes
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub async fn acquire_region_lock(&self, region: &str) -> Result<bool> {
        let acquired = self
            .store
            .set_if_absent(&keys::region_lock(region), &self.owner, self.region_ttl)
            .await?;
        if !acquired {
            debug!("Region {} is being matched elsewhere", region);
        }
        Ok(acquired)
    }

    /// Drop the region claim if this coordinator still holds it
    pub async fn release_region_lock(&self, region: &str) -> Result<()> {
        if !self
            .store
            .compare_and_delete(&keys::region_lock(region), &self.owner)
            .await?
        {
            warn!("Region {} claim lapsed before release", region);
        }
        Ok(())
    }

    pub async fn acquire_lobby_lock(&self, lobby_id: LobbyId) -> Result<bool> {
        let acquired = self
            .store
            .set_if_absent(&keys::lobby_lock(lobby_id), &self.owner, self.lobby_ttl)
            .await?;
        if !acquired {
            debug!("Lobby {} is locked by another pass", lobby_id);
        }
        Ok(acquired)
    }

    /// Drop a lobby claim taken by this coordinator; false when it is no longer ours
    pub async fn release_lobby_lock(&self, lobby_id: LobbyId) -> Result<bool> {
        self.store
            .compare_and_delete(&keys::lobby_lock(lobby_id), &self.owner)
            .await
    }

    /// Release several lobby claims at once, stopping at the first store failure
    pub async fn release_lobby_locks(&self, lobby_ids: &[LobbyId]) -> Result<()> {
        for lobby_id in lobby_ids {
            self.release_lobby_lock(*lobby_id).await?;
        }
        Ok(())
    }

    /// Hand this coordinator's lobby claims over to a ready check for `hold`.
    ///
    /// Any worker can later release them through the confirmation id. Fails
    /// with `false` at the first claim that is no longer ours.
    pub async fn hold_for_confirmation(
        &self,
        lobby_ids: &[LobbyId],
        confirmation_id: ConfirmationId,
        hold: Duration,
    ) -> Result<bool> {
        let token = confirmation_token(confirmation_id);
        for lobby_id in lobby_ids {
            let moved = self
                .store
                .compare_and_set(&keys::lobby_lock(*lobby_id), &self.owner, &token, hold)
                .await?;
            if !moved {
                warn!(
                    "Lost claim on lobby {} before confirmation {} opened",
                    lobby_id, confirmation_id
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Release claims held by a ready check, whichever worker took them
    pub async fn release_confirmation_hold(
        &self,
        lobby_ids: &[LobbyId],
        confirmation_id: ConfirmationId,
    ) -> Result<()> {
        let token = confirmation_token(confirmation_id);
        for lobby_id in lobby_ids {
            self.store
                .compare_and_delete(&keys::lobby_lock(*lobby_id), &token)
                .await?;
        }
        Ok(())
    }

    pub async fn is_lobby_locked(&self, lobby_id: LobbyId) -> Result<bool> {
        Ok(self.store.get(&keys::lobby_lock(lobby_id)).await?.is_some())
    }
}
