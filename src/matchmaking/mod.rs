//! Matchmaking core
//!
//! Queued lobbies become balanced, confirmed matches here. All state lives in
//! the coordination store, so any number of workers can run the same
//! [`Matchmaker`] against shared state; regions and lobbies are partitioned
//! between them by advisory claims.

pub mod balancer;
pub mod confirmation;
pub mod grouper;
pub mod locks;
pub mod queue;
pub mod scheduler;

use crate::amqp::publisher::EventPublisher;
use crate::config::MatchmakingSettings;
use crate::error::Result;
use crate::game::MatchService;
use crate::jobs::{disconnect_job_id, DueJob, Job, JobScheduler};
use crate::lobby::LobbyRegistry;
use crate::metrics::MetricsCollector;
use crate::store::CoordinationStore;
use crate::types::*;
use crate::utils::current_timestamp;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub use balancer::{BalanceOutcome, TeamBalancer};
pub use confirmation::{CancelOutcome, ConfirmOutcome, ConfirmationManager};
pub use grouper::{Grouper, GroupingPlan};
pub use locks::LockCoordinator;
pub use queue::{LobbyQueue, QueuePlacement};
pub use scheduler::{MatchmakingScheduler, PassOutcome};

/// External collaborators the core is wired against
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn CoordinationStore>,
    pub registry: Arc<dyn LobbyRegistry>,
    pub jobs: Arc<dyn JobScheduler>,
    pub matches: Arc<dyn MatchService>,
    pub publisher: Arc<dyn EventPublisher>,
    pub metrics: Arc<MetricsCollector>,
}

/// Broadcast current counts for `match_type` in each region; never fails
pub(crate) async fn broadcast_queue_counts<'a>(
    ctx: &Collaborators,
    queue: &LobbyQueue,
    match_type: MatchType,
    regions: impl IntoIterator<Item = &'a Region>,
) {
    for region in regions {
        let lobbies = match queue.count(match_type, region).await {
            Ok(lobbies) => lobbies,
            Err(e) => {
                warn!("Failed to count {} queue in {}: {}", match_type, region, e);
                continue;
            }
        };
        ctx.metrics.update_queue_count(match_type, region, lobbies);
        let counts = QueueCounts {
            match_type,
            region: region.clone(),
            lobbies,
            timestamp: current_timestamp(),
        };
        if let Err(e) = ctx.publisher.publish_queue_counts(counts).await {
            warn!(
                "Failed to broadcast {} queue counts for {}: {}",
                match_type, region, e
            );
        }
    }
}

/// Entry point for every matchmaking operation
pub struct Matchmaker {
    ctx: Collaborators,
    settings: MatchmakingSettings,
    locks: Arc<LockCoordinator>,
    queue: Arc<LobbyQueue>,
    confirmations: Arc<ConfirmationManager>,
    scheduler: Arc<MatchmakingScheduler>,
}

impl Matchmaker {
    pub fn new(settings: MatchmakingSettings, ctx: Collaborators) -> Self {
        let locks = Arc::new(LockCoordinator::new(
            ctx.store.clone(),
            settings.region_lock_ttl(),
            settings.lobby_lock_ttl(),
        ));
        let queue = Arc::new(LobbyQueue::new(ctx.store.clone()));
        let confirmations = Arc::new(ConfirmationManager::new(
            ctx.clone(),
            queue.clone(),
            locks.clone(),
            settings.confirmation_timeout(),
            settings.pending_lock_grace(),
            settings.requeue_jitter_max_seconds,
        ));
        let balancer = Arc::new(TeamBalancer::new(
            locks.clone(),
            queue.clone(),
            confirmations.clone(),
        ));
        let scheduler = Arc::new(MatchmakingScheduler::new(
            ctx.clone(),
            locks.clone(),
            queue.clone(),
            Grouper::from_settings(&settings),
            balancer,
            settings.reschedule_min_seconds,
            settings.reschedule_max_seconds,
        ));

        Self {
            ctx,
            settings,
            locks,
            queue,
            confirmations,
            scheduler,
        }
    }

    pub fn settings(&self) -> &MatchmakingSettings {
        &self.settings
    }

    pub fn queue(&self) -> &Arc<LobbyQueue> {
        &self.queue
    }

    pub fn locks(&self) -> &Arc<LockCoordinator> {
        &self.locks
    }

    /// Queue a lobby and run a pass in each of its regions; false when it vanished
    pub async fn add_lobby_to_queue(&self, lobby_id: LobbyId) -> Result<bool> {
        let Some(lobby) = self.ctx.registry.get_lobby_details(lobby_id).await? else {
            warn!("Cannot queue lobby {}: it no longer exists", lobby_id);
            return Ok(false);
        };

        self.queue.enqueue(&lobby).await?;
        info!(
            "Lobby queued - id: {}, type: {}, players: {}, regions: {:?}",
            lobby_id,
            lobby.match_type,
            lobby.player_count(),
            lobby.regions
        );
        broadcast_queue_counts(&self.ctx, &self.queue, lobby.match_type, lobby.regions.iter())
            .await;
        if let Err(e) = self.ctx.registry.push_queue_update(lobby_id).await {
            warn!("Failed to notify lobby {}: {}", lobby_id, e);
        }

        for region in &lobby.regions {
            if let Err(e) = self.matchmake(lobby.match_type, region).await {
                warn!(
                    "Pass for {} in {} after queueing {} failed: {}",
                    lobby.match_type, region, lobby_id, e
                );
            }
        }
        Ok(true)
    }

    /// Take a lobby out of the queue; a ready check it belongs to is cancelled
    pub async fn remove_lobby_from_queue(&self, lobby_id: LobbyId) -> Result<bool> {
        if let Some(confirmation_id) = self.ctx.registry.get_confirmation_id(lobby_id).await? {
            debug!(
                "Lobby {} left during confirmation {}, cancelling it",
                lobby_id, confirmation_id
            );
            self.confirmations.cancel(confirmation_id, false).await?;
        }

        let Some(placement) = self.queue.remove(lobby_id).await? else {
            return Ok(false);
        };
        info!("Lobby left queue - id: {}", lobby_id);
        broadcast_queue_counts(
            &self.ctx,
            &self.queue,
            placement.match_type,
            placement.regions.iter(),
        )
        .await;
        if let Err(e) = self.ctx.registry.push_queue_update(lobby_id).await {
            warn!("Failed to notify lobby {}: {}", lobby_id, e);
        }
        Ok(true)
    }

    pub async fn matchmake(&self, match_type: MatchType, region: &str) -> Result<PassOutcome> {
        self.scheduler.matchmake(match_type, region).await
    }

    pub async fn confirm_player(
        &self,
        confirmation_id: ConfirmationId,
        steam_id: &str,
    ) -> Result<ConfirmOutcome> {
        self.confirmations
            .confirm_player(confirmation_id, steam_id)
            .await
    }

    pub async fn cancel_matchmaking(
        &self,
        confirmation_id: ConfirmationId,
        has_match: bool,
    ) -> Result<CancelOutcome> {
        self.confirmations.cancel(confirmation_id, has_match).await
    }

    pub async fn cancel_matchmaking_by_match_id(&self, match_id: MatchId) -> Result<CancelOutcome> {
        self.confirmations.cancel_by_match_id(match_id).await
    }

    pub async fn get_confirmation_details(
        &self,
        confirmation_id: ConfirmationId,
    ) -> Result<Option<ConfirmationDetails>> {
        self.confirmations
            .get_confirmation_details(confirmation_id)
            .await
    }

    /// Remove a disconnected lobby after the grace period unless it reconnects
    pub async fn schedule_disconnect_removal(&self, lobby_id: LobbyId) -> Result<()> {
        self.ctx
            .jobs
            .schedule_delayed(
                &disconnect_job_id(lobby_id),
                Job::RemoveDisconnectedLobby { lobby_id },
                self.settings.disconnect_grace(),
            )
            .await?;
        self.ctx.metrics.record_job_scheduled("remove_disconnected_lobby");
        debug!(
            "Lobby {} disconnected, removal in {:?}",
            lobby_id,
            self.settings.disconnect_grace()
        );
        Ok(())
    }

    /// Keep a reconnected lobby queued; false when no removal was pending
    pub async fn cancel_disconnect_removal(&self, lobby_id: LobbyId) -> Result<bool> {
        self.ctx.jobs.cancel_delayed(&disconnect_job_id(lobby_id)).await
    }

    /// Expire ready checks any worker left overdue, then run one pass for
    /// every match type in every served region; returns confirmations opened
    pub async fn sweep(&self) -> Result<usize> {
        let expired = self.confirmations.expire_overdue().await?;
        if expired > 0 {
            info!("Sweep expired {} overdue confirmations", expired);
        }

        let mut confirmations = 0;
        for match_type in MatchType::ALL {
            for region in &self.settings.regions {
                let outcome = self.matchmake(match_type, region).await?;
                confirmations += outcome.confirmations.len();
            }
        }
        Ok(confirmations)
    }

    /// Execute a delayed job that came due
    pub async fn run_job(&self, due: DueJob) -> Result<()> {
        let name = due.job.name();
        debug!("Running job {} ({})", due.job_id, name);

        let result = match due.job {
            Job::CancelConfirmation { confirmation_id } => self
                .confirmations
                .cancel(confirmation_id, false)
                .await
                .map(|_| ()),
            Job::Matchmake { match_type, region } => {
                self.matchmake(match_type, &region).await.map(|_| ())
            }
            Job::RemoveDisconnectedLobby { lobby_id } => {
                self.remove_lobby_from_queue(lobby_id).await.map(|_| ())
            }
        };

        self.ctx.metrics.record_job_run(name, result.is_ok());
        result
    }
}
