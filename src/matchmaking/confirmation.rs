//! Timed ready checks
//!
//! A confirmation is opened for two full teams, removes every contributing
//! lobby from the live queue and arms a timeout job. It ends exactly once:
//! either every player acknowledges and a match is created, or it is
//! cancelled. Both paths race for a terminal claim key in the store; the
//! loser backs off.
//!
//! Open confirmations are also listed in the store next to a deadline key
//! that expires with the timeout. Any worker's sweep cancels listed
//! confirmations whose deadline is gone, so a ready check opened by a worker
//! that died still ends.

use crate::error::{MatchmakingError, Result};
use crate::game::{MatchOptions, MatchRules};
use crate::jobs::{confirmation_timeout_job_id, matchmake_job_id, Job};
use crate::matchmaking::locks::LockCoordinator;
use crate::matchmaking::queue::LobbyQueue;
use crate::matchmaking::{broadcast_queue_counts, Collaborators};
use crate::store::keys;
use crate::types::*;
use crate::utils::{current_timestamp, generate_confirmation_id, random_delay};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How long a finalized confirmation stays resolvable by match id
const FINALIZED_RETENTION: Duration = Duration::from_secs(6 * 60 * 60);

/// Result of a single acknowledgment
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmOutcome {
    /// Still waiting on other players
    Waiting { confirmed: usize, expected: usize },
    /// Every player acknowledged and the match is live
    Finalized { match_id: MatchId },
    /// Every player acknowledged but match creation failed; lobbies were requeued
    CreationFailed { reason: String },
    /// Another path already finished this confirmation
    Closed,
}

/// Lobbies affected by a cancellation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CancelOutcome {
    pub requeued: Vec<LobbyId>,
    pub dropped: Vec<LobbyId>,
    pub rescheduled: bool,
}

pub struct ConfirmationManager {
    ctx: Collaborators,
    queue: Arc<LobbyQueue>,
    locks: Arc<LockCoordinator>,
    timeout: Duration,
    pending_grace: Duration,
    requeue_jitter_max_seconds: u64,
}

impl ConfirmationManager {
    pub fn new(
        ctx: Collaborators,
        queue: Arc<LobbyQueue>,
        locks: Arc<LockCoordinator>,
        timeout: Duration,
        pending_grace: Duration,
        requeue_jitter_max_seconds: u64,
    ) -> Self {
        Self {
            ctx,
            queue,
            locks,
            timeout,
            pending_grace,
            requeue_jitter_max_seconds,
        }
    }

    /// Store lifetime of a pending record; outlives the timeout job
    fn record_ttl(&self) -> Duration {
        self.timeout + self.pending_grace
    }

    /// Open a ready check between two full teams
    pub async fn create_confirmation(
        &self,
        region: &str,
        match_type: MatchType,
        team1: Team,
        team2: Team,
    ) -> Result<ConfirmationId> {
        let id = generate_confirmation_id();
        if region.trim().is_empty() {
            return Err(MatchmakingError::MissingRegion {
                confirmation_id: id.to_string(),
            }
            .into());
        }

        let mut lobby_ids: Vec<LobbyId> = team1.lobbies.clone();
        for lobby_id in &team2.lobbies {
            if !lobby_ids.contains(lobby_id) {
                lobby_ids.push(*lobby_id);
            }
        }

        let now = current_timestamp();
        let confirmation = Confirmation {
            id,
            region: region.to_string(),
            match_type,
            team1,
            team2,
            lobby_ids,
            expires_at: now + chrono::Duration::milliseconds(self.timeout.as_millis() as i64),
            match_id: None,
            created_at: now,
        };
        if !confirmation.teams_are_valid() {
            return Err(MatchmakingError::InternalError {
                message: format!(
                    "Refusing confirmation {} with {}+{} players for {}",
                    id,
                    confirmation.team1.len(),
                    confirmation.team2.len(),
                    match_type
                ),
            }
            .into());
        }

        let mut dequeued = Vec::new();
        let result = async {
            if !self
                .locks
                .hold_for_confirmation(&confirmation.lobby_ids, id, self.pending_grace)
                .await?
            {
                return Err(anyhow::Error::from(MatchmakingError::InternalError {
                    message: format!("Lobby claims lapsed before confirmation {} opened", id),
                }));
            }
            for lobby_id in &confirmation.lobby_ids {
                if let Some(placement) = self.queue.remove(*lobby_id).await? {
                    dequeued.push(placement);
                }
                self.ctx.registry.set_confirmation_id(*lobby_id, id).await?;
            }
            self.save(&confirmation, self.record_ttl()).await?;
            // Deadline before listing, so a sweep never sees a listed entry without one.
            self.ctx
                .store
                .set(&keys::confirmation_deadline(id), "pending", Some(self.timeout))
                .await?;
            self.ctx
                .store
                .set_add(&keys::pending_confirmations(), &id.to_string())
                .await?;
            self.ctx
                .jobs
                .schedule_delayed(
                    &confirmation_timeout_job_id(id),
                    Job::CancelConfirmation {
                        confirmation_id: id,
                    },
                    self.timeout,
                )
                .await?;
            Ok::<(), anyhow::Error>(())
        }
        .await;

        if let Err(e) = result {
            warn!("Rolling back confirmation {}: {}", id, e);
            self.rollback(&confirmation).await;
            return Err(e);
        }

        info!(
            "Opened confirmation {} - type: {}, region: {}, lobbies: {}, ranks: {:.1} vs {:.1}",
            id,
            match_type,
            region,
            confirmation.lobby_ids.len(),
            confirmation.team1.avg_rank,
            confirmation.team2.avg_rank
        );
        self.ctx.metrics.record_confirmation(match_type, "created");
        self.ctx.metrics.record_job_scheduled("cancel_confirmation");

        let regions: BTreeSet<Region> = dequeued.into_iter().flat_map(|p| p.regions).collect();
        broadcast_queue_counts(&self.ctx, &self.queue, match_type, regions.iter()).await;
        self.publish_update(&confirmation, ConfirmationStatus::Pending, 0)
            .await;
        self.notify_lobbies(&confirmation.lobby_ids).await;

        Ok(id)
    }

    /// Record one player's acknowledgment and finalize once everyone is in
    pub async fn confirm_player(
        &self,
        confirmation_id: ConfirmationId,
        steam_id: &str,
    ) -> Result<ConfirmOutcome> {
        let confirmation = self.require(confirmation_id).await?;
        if !confirmation.contains_player(steam_id) {
            return Err(MatchmakingError::PlayerNotInConfirmation {
                confirmation_id: confirmation_id.to_string(),
                steam_id: steam_id.to_string(),
            }
            .into());
        }
        if confirmation.match_id.is_some() {
            return Ok(ConfirmOutcome::Closed);
        }

        let acks_key = keys::confirmation_acks(confirmation_id);
        let newly_confirmed = self.ctx.store.set_add(&acks_key, steam_id).await?;
        self.ctx.store.expire(&acks_key, self.record_ttl()).await?;

        let confirmed = self.ctx.store.set_len(&acks_key).await?;
        let expected = confirmation.expected_players();
        if newly_confirmed {
            debug!(
                "Player {} confirmed {} ({}/{})",
                steam_id, confirmation_id, confirmed, expected
            );
            self.publish_update(&confirmation, ConfirmationStatus::Pending, confirmed)
                .await;
        }

        if confirmed < expected {
            return Ok(ConfirmOutcome::Waiting {
                confirmed,
                expected,
            });
        }

        if !self.claim_terminal(confirmation_id, "finalizing").await? {
            debug!("Confirmation {} already ended elsewhere", confirmation_id);
            return Ok(ConfirmOutcome::Closed);
        }
        // A timer that still fires loses the terminal claim.
        if let Err(e) = self
            .ctx
            .jobs
            .cancel_delayed(&confirmation_timeout_job_id(confirmation_id))
            .await
        {
            warn!("Failed to cancel timeout of {}: {}", confirmation_id, e);
        }

        let match_id = match self.start_match(&confirmation).await {
            Ok(match_id) => match_id,
            Err(e) => {
                error!(
                    "Match creation failed for confirmation {} ({}): {}",
                    confirmation_id, confirmation.match_type, e
                );
                self.ctx
                    .metrics
                    .record_match_creation_failure(confirmation.match_type);
                self.cancel_claimed(&confirmation, false).await?;
                return Ok(ConfirmOutcome::CreationFailed {
                    reason: e.to_string(),
                });
            }
        };

        // The match is live from here on; nothing below may turn it into a cancel.
        self.record_finalized(confirmation, match_id).await;
        Ok(ConfirmOutcome::Finalized { match_id })
    }

    /// Create the match, seat both lineups and take it live
    async fn start_match(&self, confirmation: &Confirmation) -> Result<MatchId> {
        let options = MatchOptions {
            region: confirmation.region.clone(),
            rules: MatchRules::for_type(confirmation.match_type),
            confirmation_id: confirmation.id,
        };
        let created = self
            .ctx
            .matches
            .create_match(confirmation.match_type, options)
            .await?;
        self.ctx
            .matches
            .insert_lineup_players(created.lineup1_id, &confirmation.team1.steam_ids())
            .await?;
        self.ctx
            .matches
            .insert_lineup_players(created.lineup2_id, &confirmation.team2.steam_ids())
            .await?;
        self.ctx.matches.set_match_live(created.id).await?;
        Ok(created.id)
    }

    /// Store bookkeeping once a match is live; failures are logged, never raised
    async fn record_finalized(&self, mut confirmation: Confirmation, match_id: MatchId) {
        let id = confirmation.id;
        confirmation.match_id = Some(match_id);

        if let Err(e) = self
            .ctx
            .store
            .set(&keys::confirmation_terminal(id), "finalized", Some(FINALIZED_RETENTION))
            .await
        {
            error!("Failed to mark confirmation {} finalized: {}", id, e);
        }

        let recorded = async {
            self.save(&confirmation, FINALIZED_RETENTION).await?;
            self.ctx
                .store
                .set(
                    &keys::match_confirmation(match_id),
                    &id.to_string(),
                    Some(FINALIZED_RETENTION),
                )
                .await?;
            self.ctx
                .store
                .expire(&keys::confirmation_acks(id), FINALIZED_RETENTION)
                .await?;
            Ok::<(), anyhow::Error>(())
        }
        .await;
        if let Err(e) = recorded {
            error!(
                "Match {} is live but confirmation {} was not fully recorded: {}",
                match_id, id, e
            );
        }

        self.forget_pending(id).await;
        for lobby_id in &confirmation.lobby_ids {
            if let Err(e) = self.ctx.registry.clear_confirmation_id(*lobby_id).await {
                warn!("Failed to clear confirmation of lobby {}: {}", lobby_id, e);
            }
        }
        if let Err(e) = self
            .locks
            .release_confirmation_hold(&confirmation.lobby_ids, id)
            .await
        {
            warn!("Failed to release lobby locks for {}: {}", id, e);
        }

        info!(
            "Finalized confirmation {} - match: {}, type: {}, region: {}",
            id, match_id, confirmation.match_type, confirmation.region
        );
        self.ctx
            .metrics
            .record_confirmation(confirmation.match_type, "finalized");
        self.publish_update(
            &confirmation,
            ConfirmationStatus::Finalized,
            confirmation.expected_players(),
        )
        .await;
        self.notify_lobbies(&confirmation.lobby_ids).await;
    }

    /// Cancel a ready check; a no-op once it has already ended
    pub async fn cancel(
        &self,
        confirmation_id: ConfirmationId,
        has_match: bool,
    ) -> Result<CancelOutcome> {
        let Some(confirmation) = self.load(confirmation_id).await? else {
            debug!("Confirmation {} is already gone", confirmation_id);
            return Ok(CancelOutcome::default());
        };

        if has_match {
            // Tearing down a created match always wins over the claim.
            self.ctx
                .store
                .set(
                    &keys::confirmation_terminal(confirmation_id),
                    "cancelling",
                    Some(self.record_ttl()),
                )
                .await?;
        } else if !self.claim_terminal(confirmation_id, "cancelling").await? {
            debug!(
                "Confirmation {} already ended, ignoring cancel",
                confirmation_id
            );
            return Ok(CancelOutcome::default());
        }

        self.cancel_claimed(&confirmation, has_match).await
    }

    /// Cancel the confirmation behind a created match
    pub async fn cancel_by_match_id(&self, match_id: MatchId) -> Result<CancelOutcome> {
        let confirmation_id = self
            .ctx
            .store
            .get(&keys::match_confirmation(match_id))
            .await?
            .and_then(|id| id.parse::<ConfirmationId>().ok());
        match confirmation_id {
            Some(confirmation_id) => self.cancel(confirmation_id, true).await,
            None => {
                debug!("No confirmation recorded for match {}", match_id);
                Ok(CancelOutcome::default())
            }
        }
    }

    async fn cancel_claimed(
        &self,
        confirmation: &Confirmation,
        has_match: bool,
    ) -> Result<CancelOutcome> {
        let id = confirmation.id;
        self.ctx
            .jobs
            .cancel_delayed(&confirmation_timeout_job_id(id))
            .await?;

        let acknowledged: HashSet<SteamId> = self
            .ctx
            .store
            .set_members(&keys::confirmation_acks(id))
            .await?
            .into_iter()
            .collect();

        let mut outcome = CancelOutcome::default();
        let mut regions: BTreeSet<Region> = BTreeSet::new();
        regions.insert(confirmation.region.clone());

        for lobby_id in &confirmation.lobby_ids {
            let lobby_id = *lobby_id;
            if let Err(e) = self
                .locks
                .release_confirmation_hold(&[lobby_id], id)
                .await
            {
                warn!("Failed to release lock for lobby {}: {}", lobby_id, e);
            }
            let result = async {
                self.ctx.registry.clear_confirmation_id(lobby_id).await?;
                let details = self.ctx.registry.get_lobby_details(lobby_id).await?;

                let requeue = match &details {
                    Some(lobby) if !has_match => lobby
                        .players
                        .iter()
                        .all(|p| acknowledged.contains(&p.steam_id)),
                    _ => false,
                };

                match details {
                    Some(lobby) if requeue => {
                        self.queue.enqueue(&lobby).await?;
                        regions.extend(lobby.regions.iter().cloned());
                        outcome.requeued.push(lobby_id);
                    }
                    _ => {
                        if let Some(placement) = self.queue.remove(lobby_id).await? {
                            regions.extend(placement.regions);
                        }
                        self.ctx.registry.delete_lobby(lobby_id).await?;
                        outcome.dropped.push(lobby_id);
                    }
                }
                Ok::<(), anyhow::Error>(())
            }
            .await;

            if let Err(e) = result {
                error!(
                    "Failed to resolve lobby {} of cancelled confirmation {}: {}",
                    lobby_id, id, e
                );
            }
        }

        self.forget_pending(id).await;
        self.ctx.store.delete(&keys::confirmation(id)).await?;
        self.ctx.store.delete(&keys::confirmation_acks(id)).await?;
        self.ctx
            .store
            .expire(&keys::confirmation_terminal(id), self.record_ttl())
            .await?;
        if let Some(match_id) = confirmation.match_id {
            self.ctx
                .store
                .delete(&keys::match_confirmation(match_id))
                .await?;
        }

        info!(
            "Cancelled confirmation {} - type: {}, region: {}, has_match: {}, requeued: {}, dropped: {}",
            id,
            confirmation.match_type,
            confirmation.region,
            has_match,
            outcome.requeued.len(),
            outcome.dropped.len()
        );
        self.ctx
            .metrics
            .record_confirmation(confirmation.match_type, "cancelled");
        self.ctx
            .metrics
            .record_lobby_outcomes(outcome.requeued.len(), outcome.dropped.len());

        broadcast_queue_counts(&self.ctx, &self.queue, confirmation.match_type, regions.iter())
            .await;
        self.publish_update(
            confirmation,
            ConfirmationStatus::Cancelled,
            acknowledged.len(),
        )
        .await;
        self.notify_lobbies(&confirmation.lobby_ids).await;

        if !outcome.requeued.is_empty() {
            let delay = random_delay(0, self.requeue_jitter_max_seconds);
            let job = Job::Matchmake {
                match_type: confirmation.match_type,
                region: confirmation.region.clone(),
            };
            self.ctx
                .jobs
                .schedule_delayed(
                    &matchmake_job_id(confirmation.match_type, &confirmation.region),
                    job,
                    delay,
                )
                .await?;
            self.ctx.metrics.record_job_scheduled("matchmake");
            outcome.rescheduled = true;
            debug!(
                "Scheduled {} pass in {} after cancel in {:?}",
                confirmation.match_type, confirmation.region, delay
            );
        }

        Ok(outcome)
    }

    /// Cancel listed confirmations whose deadline passed; returns how many ended here
    pub async fn expire_overdue(&self) -> Result<usize> {
        let listed = self
            .ctx
            .store
            .set_members(&keys::pending_confirmations())
            .await?;
        let mut expired = 0;

        for member in listed {
            let Ok(id) = member.parse::<ConfirmationId>() else {
                warn!("Dropping malformed pending confirmation entry {}", member);
                self.ctx
                    .store
                    .set_remove(&keys::pending_confirmations(), &member)
                    .await?;
                continue;
            };
            if self
                .ctx
                .store
                .get(&keys::confirmation_deadline(id))
                .await?
                .is_some()
            {
                continue;
            }
            if self.load(id).await?.is_none() {
                debug!("Pending confirmation {} has no record left", id);
                self.forget_pending(id).await;
                continue;
            }

            match self.cancel(id, false).await {
                Ok(outcome) if outcome != CancelOutcome::default() => {
                    info!("Expired overdue confirmation {}", id);
                    expired += 1;
                }
                Ok(_) => {}
                Err(e) => warn!("Failed to expire confirmation {}: {}", id, e),
            }
        }

        Ok(expired)
    }

    pub async fn get_confirmation_details(
        &self,
        confirmation_id: ConfirmationId,
    ) -> Result<Option<ConfirmationDetails>> {
        let Some(confirmation) = self.load(confirmation_id).await? else {
            return Ok(None);
        };
        let confirmed = self
            .ctx
            .store
            .set_members(&keys::confirmation_acks(confirmation_id))
            .await?;
        let expected = confirmation.expected_players();
        Ok(Some(ConfirmationDetails {
            confirmation,
            confirmed,
            expected,
        }))
    }

    async fn claim_terminal(&self, confirmation_id: ConfirmationId, state: &str) -> Result<bool> {
        self.ctx
            .store
            .set_if_absent(
                &keys::confirmation_terminal(confirmation_id),
                state,
                self.record_ttl(),
            )
            .await
    }

    /// Take a confirmation off the pending list and drop its deadline
    async fn forget_pending(&self, confirmation_id: ConfirmationId) {
        let removed = async {
            self.ctx
                .store
                .set_remove(&keys::pending_confirmations(), &confirmation_id.to_string())
                .await?;
            self.ctx
                .store
                .delete(&keys::confirmation_deadline(confirmation_id))
                .await?;
            Ok::<(), anyhow::Error>(())
        }
        .await;
        if let Err(e) = removed {
            warn!(
                "Failed to unlist confirmation {}: {}",
                confirmation_id, e
            );
        }
    }

    async fn load(&self, confirmation_id: ConfirmationId) -> Result<Option<Confirmation>> {
        let Some(json) = self
            .ctx
            .store
            .get(&keys::confirmation(confirmation_id))
            .await?
        else {
            return Ok(None);
        };
        let confirmation = serde_json::from_str(&json).map_err(|e| MatchmakingError::Store {
            message: format!("Unreadable confirmation {}: {}", confirmation_id, e),
        })?;
        Ok(Some(confirmation))
    }

    async fn require(&self, confirmation_id: ConfirmationId) -> Result<Confirmation> {
        self.load(confirmation_id).await?.ok_or_else(|| {
            MatchmakingError::ConfirmationNotFound {
                confirmation_id: confirmation_id.to_string(),
            }
            .into()
        })
    }

    async fn save(&self, confirmation: &Confirmation, ttl: Duration) -> Result<()> {
        let json =
            serde_json::to_string(confirmation).map_err(|e| MatchmakingError::InternalError {
                message: format!("Failed to serialize confirmation {}: {}", confirmation.id, e),
            })?;
        self.ctx
            .store
            .set(&keys::confirmation(confirmation.id), &json, Some(ttl))
            .await
    }

    /// Undo a partially created confirmation so its lobbies are queued again
    async fn rollback(&self, confirmation: &Confirmation) {
        for lobby_id in &confirmation.lobby_ids {
            let restored = async {
                self.ctx.registry.clear_confirmation_id(*lobby_id).await?;
                if let Some(lobby) = self.ctx.registry.get_lobby_details(*lobby_id).await? {
                    self.queue.enqueue(&lobby).await?;
                }
                Ok::<(), anyhow::Error>(())
            }
            .await;
            if let Err(e) = restored {
                error!("Failed to restore lobby {} after rollback: {}", lobby_id, e);
            }
        }
        if let Err(e) = self.ctx.store.delete(&keys::confirmation(confirmation.id)).await {
            warn!("Failed to delete rolled back confirmation {}: {}", confirmation.id, e);
        }
        self.forget_pending(confirmation.id).await;
        if let Err(e) = self
            .locks
            .release_confirmation_hold(&confirmation.lobby_ids, confirmation.id)
            .await
        {
            warn!(
                "Failed to release lobby locks of rolled back confirmation {}: {}",
                confirmation.id, e
            );
        }
        if let Err(e) = self
            .ctx
            .jobs
            .cancel_delayed(&confirmation_timeout_job_id(confirmation.id))
            .await
        {
            warn!(
                "Failed to cancel timeout of rolled back confirmation {}: {}",
                confirmation.id, e
            );
        }
    }

    async fn publish_update(
        &self,
        confirmation: &Confirmation,
        status: ConfirmationStatus,
        confirmed: usize,
    ) {
        let update = ConfirmationUpdate {
            confirmation_id: confirmation.id,
            match_type: confirmation.match_type,
            region: confirmation.region.clone(),
            status,
            confirmed,
            expected: confirmation.expected_players(),
            expires_at: confirmation.expires_at,
            match_id: confirmation.match_id,
            timestamp: current_timestamp(),
        };
        if let Err(e) = self.ctx.publisher.publish_confirmation_update(update).await {
            warn!(
                "Failed to broadcast {} update for {}: {}",
                status.as_str(),
                confirmation.id,
                e
            );
        }
    }

    async fn notify_lobbies(&self, lobby_ids: &[LobbyId]) {
        for lobby_id in lobby_ids {
            if let Err(e) = self.ctx.registry.push_queue_update(*lobby_id).await {
                warn!("Failed to notify lobby {}: {}", lobby_id, e);
            }
        }
    }
}
