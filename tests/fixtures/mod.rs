//! Test fixtures and collaborators for integration testing
//!
//! A [`TestSystem`] wires a [`Matchmaker`] against an in-memory store with
//! the recording publisher and a match service that can be told to fail.
//! Extra workers share the same store, so they contend for the same claims
//! the way separate service instances would.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use ready_room::amqp::publisher::MockEventPublisher;
use ready_room::config::MatchmakingSettings;
use ready_room::error::{MatchmakingError, Result};
use ready_room::game::{CreatedMatch, MatchOptions, MatchService, StoreMatchService};
use ready_room::jobs::{DueJob, TokioJobScheduler};
use ready_room::metrics::MetricsCollector;
use ready_room::types::{
    ConfirmationId, LineupId, LobbyDetails, LobbyId, LobbyPlayer, MatchId, MatchType, SteamId,
};
use ready_room::utils::current_timestamp;
use ready_room::{Collaborators, CoordinationStore, LobbyRegistry, Matchmaker, MemoryStore, StoreLobbyRegistry};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Match service that delegates to the store-backed one unless told to fail
pub struct FlakyMatchService {
    inner: StoreMatchService,
    fail_create: AtomicBool,
    create_calls: AtomicUsize,
}

impl FlakyMatchService {
    pub fn new(store: Arc<dyn CoordinationStore>, publisher: Arc<MockEventPublisher>) -> Self {
        Self {
            inner: StoreMatchService::new(store, publisher),
            fail_create: AtomicBool::new(false),
            create_calls: AtomicUsize::new(0),
        }
    }

    /// Make every following `create_match` call fail
    pub fn set_failing(&self, failing: bool) {
        self.fail_create.store(failing, Ordering::SeqCst);
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn store_service(&self) -> &StoreMatchService {
        &self.inner
    }
}

#[async_trait]
impl MatchService for FlakyMatchService {
    async fn create_match(&self, match_type: MatchType, options: MatchOptions) -> Result<CreatedMatch> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(MatchmakingError::MatchCreationFailed {
                reason: "no game server available".to_string(),
            }
            .into());
        }
        self.inner.create_match(match_type, options).await
    }

    async fn insert_lineup_players(&self, lineup_id: LineupId, steam_ids: &[SteamId]) -> Result<()> {
        self.inner.insert_lineup_players(lineup_id, steam_ids).await
    }

    async fn set_match_live(&self, match_id: MatchId) -> Result<()> {
        self.inner.set_match_live(match_id).await
    }
}

/// A complete matchmaking system over one shared in-memory store
pub struct TestSystem {
    pub matchmaker: Arc<Matchmaker>,
    pub store: Arc<MemoryStore>,
    pub registry: Arc<StoreLobbyRegistry>,
    pub jobs: Arc<TokioJobScheduler>,
    pub matches: Arc<FlakyMatchService>,
    pub publisher: Arc<MockEventPublisher>,
    pub metrics: Arc<MetricsCollector>,
    pub settings: MatchmakingSettings,
    /// Due jobs of the primary matchmaker; `None` once handed to a worker
    pub due: Option<mpsc::UnboundedReceiver<DueJob>>,
    // Receivers of extra workers stay alive so their schedulers keep working.
    worker_due: Mutex<Vec<mpsc::UnboundedReceiver<DueJob>>>,
}

impl TestSystem {
    pub fn new() -> Self {
        Self::with_settings(MatchmakingSettings::default())
    }

    pub fn with_settings(settings: MatchmakingSettings) -> Self {
        let store = Arc::new(MemoryStore::new());
        let publisher = Arc::new(MockEventPublisher::new());
        let shared: Arc<dyn CoordinationStore> = store.clone();
        let registry = Arc::new(StoreLobbyRegistry::new(shared.clone(), publisher.clone()));
        let matches = Arc::new(FlakyMatchService::new(shared, publisher.clone()));
        let metrics = Arc::new(MetricsCollector::new().expect("metrics collector"));
        let (jobs, due) = TokioJobScheduler::new();
        let jobs = Arc::new(jobs);

        let matchmaker = Arc::new(Matchmaker::new(
            settings.clone(),
            Collaborators {
                store: store.clone(),
                registry: registry.clone(),
                jobs: jobs.clone(),
                matches: matches.clone(),
                publisher: publisher.clone(),
                metrics: metrics.clone(),
            },
        ));

        Self {
            matchmaker,
            store,
            registry,
            jobs,
            matches,
            publisher,
            metrics,
            settings,
            due: Some(due),
            worker_due: Mutex::new(Vec::new()),
        }
    }

    /// Another matchmaker instance sharing this system's store and registry
    pub fn spawn_worker(&self) -> Arc<Matchmaker> {
        let (jobs, due) = TokioJobScheduler::new();
        self.worker_due.lock().expect("worker receivers").push(due);

        Arc::new(Matchmaker::new(
            self.settings.clone(),
            Collaborators {
                store: self.store.clone(),
                registry: self.registry.clone(),
                jobs: Arc::new(jobs),
                matches: self.matches.clone(),
                publisher: self.publisher.clone(),
                metrics: self.metrics.clone(),
            },
        ))
    }

    /// Register a lobby and put it in the queue without running a pass
    pub async fn queue_lobby(&self, lobby: &LobbyDetails) {
        self.registry.upsert_lobby(lobby).await.expect("upsert lobby");
        self.matchmaker
            .queue()
            .enqueue(lobby)
            .await
            .expect("enqueue lobby");
    }

    pub async fn queue_lobbies(&self, lobbies: &[LobbyDetails]) {
        for lobby in lobbies {
            self.queue_lobby(lobby).await;
        }
    }

    /// Register a lobby and queue it through the public entry point
    pub async fn submit_lobby(&self, lobby: &LobbyDetails) -> bool {
        self.registry.upsert_lobby(lobby).await.expect("upsert lobby");
        self.matchmaker
            .add_lobby_to_queue(lobby.lobby_id)
            .await
            .expect("add lobby to queue")
    }

    pub async fn is_queued(&self, lobby_id: LobbyId) -> bool {
        self.matchmaker
            .queue()
            .contains(lobby_id)
            .await
            .expect("queue membership")
    }

    pub async fn is_locked(&self, lobby_id: LobbyId) -> bool {
        self.matchmaker
            .locks()
            .is_lobby_locked(lobby_id)
            .await
            .expect("lobby lock state")
    }

    pub async fn lobby_exists(&self, lobby_id: LobbyId) -> bool {
        self.registry
            .get_lobby_details(lobby_id)
            .await
            .expect("lobby details")
            .is_some()
    }

    pub async fn confirmation_of(&self, lobby_id: LobbyId) -> Option<ConfirmationId> {
        self.registry
            .get_confirmation_id(lobby_id)
            .await
            .expect("confirmation backreference")
    }

    /// Wait for the next due job of the primary matchmaker
    pub async fn next_due_job(&mut self) -> DueJob {
        self.due
            .as_mut()
            .expect("due jobs already handed to a worker")
            .recv()
            .await
            .expect("job channel open")
    }
}

impl Default for TestSystem {
    fn default() -> Self {
        Self::new()
    }
}

fn player_id() -> SteamId {
    format!("7656{}", Uuid::new_v4().simple())
}

/// Lobby whose members have the given ranks, queued `waited_secs` ago
pub fn party(match_type: MatchType, regions: &[&str], ranks: &[f64], waited_secs: i64) -> LobbyDetails {
    LobbyDetails::new(
        Uuid::new_v4(),
        match_type,
        regions.iter().map(|r| r.to_string()).collect(),
        ranks.iter().map(|rank| LobbyPlayer::new(player_id(), *rank)).collect(),
        current_timestamp() - ChronoDuration::seconds(waited_secs),
    )
}

/// Single-player lobby in one region
pub fn solo(match_type: MatchType, region: &str, rank: f64) -> LobbyDetails {
    party(match_type, &[region], &[rank], 0)
}

/// Ten solo competitive lobbies ranked 1000 through 1900
pub fn ten_solos(region: &str) -> Vec<LobbyDetails> {
    (0..10)
        .map(|i| solo(MatchType::Competitive, region, 1000.0 + 100.0 * i as f64))
        .collect()
}

pub fn steam_ids(lobbies: &[LobbyDetails]) -> Vec<SteamId> {
    lobbies.iter().flat_map(|lobby| lobby.steam_ids()).collect()
}
