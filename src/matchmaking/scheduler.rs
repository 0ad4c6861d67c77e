//! Per (type, region) matchmaking passes
//!
//! A pass claims the region, reads a fresh snapshot of the queue, groups it
//! and balances every group concurrently. The region claim is released on
//! every exit path. When enough players are left over for another match the
//! pass schedules itself again after a randomized delay.

use crate::error::Result;
use crate::jobs::{matchmake_job_id, Job};
use crate::matchmaking::balancer::{BalanceOutcome, TeamBalancer};
use crate::matchmaking::grouper::Grouper;
use crate::matchmaking::locks::LockCoordinator;
use crate::matchmaking::queue::LobbyQueue;
use crate::matchmaking::Collaborators;
use crate::types::{ConfirmationId, LobbyDetails, MatchType};
use crate::utils::{current_timestamp, random_delay};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// What a call to `matchmake` did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassOutcome {
    /// False when another worker held the region
    pub ran: bool,
    pub confirmations: Vec<ConfirmationId>,
    pub unplaced: usize,
    pub rescheduled: bool,
}

impl PassOutcome {
    fn skipped() -> Self {
        Self::default()
    }
}

pub struct MatchmakingScheduler {
    ctx: Collaborators,
    locks: Arc<LockCoordinator>,
    queue: Arc<LobbyQueue>,
    grouper: Grouper,
    balancer: Arc<TeamBalancer>,
    reschedule_min_seconds: u64,
    reschedule_max_seconds: u64,
}

impl MatchmakingScheduler {
    pub fn new(
        ctx: Collaborators,
        locks: Arc<LockCoordinator>,
        queue: Arc<LobbyQueue>,
        grouper: Grouper,
        balancer: Arc<TeamBalancer>,
        reschedule_min_seconds: u64,
        reschedule_max_seconds: u64,
    ) -> Self {
        Self {
            ctx,
            locks,
            queue,
            grouper,
            balancer,
            reschedule_min_seconds,
            reschedule_max_seconds,
        }
    }

    pub async fn matchmake(&self, match_type: MatchType, region: &str) -> Result<PassOutcome> {
        if !self.locks.acquire_region_lock(region).await? {
            self.ctx.metrics.record_pass_skipped(match_type);
            return Ok(PassOutcome::skipped());
        }

        let started = Instant::now();
        let result = self.run_pass(match_type, region).await;

        if let Err(e) = self.locks.release_region_lock(region).await {
            warn!("Failed to release region lock for {}: {}", region, e);
        }

        let mut outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                self.ctx.metrics.record_pass_failed(match_type);
                return Err(e);
            }
        };
        self.ctx
            .metrics
            .record_pass(match_type, region, outcome.unplaced, started.elapsed());

        if outcome.unplaced >= match_type.required_players() {
            let delay = random_delay(self.reschedule_min_seconds, self.reschedule_max_seconds);
            info!(
                "Rescheduling {} pass in {} - unplaced: {}, delay: {:?}",
                match_type, region, outcome.unplaced, delay
            );
            self.ctx
                .jobs
                .schedule_delayed(
                    &matchmake_job_id(match_type, region),
                    Job::Matchmake {
                        match_type,
                        region: region.to_string(),
                    },
                    delay,
                )
                .await?;
            self.ctx.metrics.record_job_scheduled("matchmake");
            outcome.rescheduled = true;
        }

        Ok(outcome)
    }

    async fn run_pass(&self, match_type: MatchType, region: &str) -> Result<PassOutcome> {
        let lobby_ids = self.queue.snapshot(match_type, region).await?;
        if lobby_ids.is_empty() {
            debug!("No lobbies queued for {} in {}", match_type, region);
            return Ok(PassOutcome {
                ran: true,
                ..PassOutcome::default()
            });
        }

        let fetched = join_all(
            lobby_ids
                .iter()
                .map(|id| self.ctx.registry.get_lobby_details(*id)),
        )
        .await;

        let mut lobbies: Vec<LobbyDetails> = Vec::with_capacity(fetched.len());
        for (lobby_id, details) in lobby_ids.iter().zip(fetched) {
            match details? {
                Some(lobby) if lobby.match_type == match_type => lobbies.push(lobby),
                Some(lobby) => warn!(
                    "Lobby {} is queued for {} but wants {}",
                    lobby_id, match_type, lobby.match_type
                ),
                None => warn!("Lobby {} vanished while queued, skipping", lobby_id),
            }
        }

        let plan = self.grouper.group(match_type, lobbies, current_timestamp());
        debug!(
            "Grouped {} in {} - full: {}, groups: {}, unplaceable: {}",
            match_type,
            region,
            plan.full_lobbies.len(),
            plan.groups.len(),
            plan.unplaceable.len()
        );

        let full = join_all(
            plan.full_lobbies
                .into_iter()
                .map(|lobby| self.balancer.match_full_lobby(region, lobby)),
        );
        let grouped = join_all(
            plan.groups
                .into_iter()
                .map(|group| self.balancer.balance(region, match_type, group)),
        );
        let (full, grouped) = futures::join!(full, grouped);

        let mut total = BalanceOutcome::default();
        for outcome in full.into_iter().chain(grouped) {
            total.merge(outcome?);
        }

        Ok(PassOutcome {
            ran: true,
            confirmations: total.confirmations,
            unplaced: total.unplaced,
            rescheduled: false,
        })
    }
}
