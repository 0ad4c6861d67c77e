//! Store-backed match service
//!
//! Keeps a JSON record per created match in the coordination store and
//! announces matches once they go live.

use crate::amqp::publisher::EventPublisher;
use crate::error::{MatchmakingError, Result};
use crate::game::{CreatedMatch, MatchOptions, MatchService};
use crate::store::{keys, CoordinationStore};
use crate::types::{LineupId, MatchId, MatchLive, MatchType, SteamId};
use crate::utils::current_timestamp;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Persisted match record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: MatchId,
    pub match_type: MatchType,
    pub options: MatchOptions,
    pub lineup1_id: LineupId,
    pub lineup2_id: LineupId,
    pub lineup1: Vec<SteamId>,
    pub lineup2: Vec<SteamId>,
    pub live: bool,
    pub created_at: DateTime<Utc>,
}

pub struct StoreMatchService {
    store: Arc<dyn CoordinationStore>,
    publisher: Arc<dyn EventPublisher>,
}

impl StoreMatchService {
    pub fn new(store: Arc<dyn CoordinationStore>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { store, publisher }
    }

    pub async fn get_match(&self, match_id: MatchId) -> Result<Option<MatchRecord>> {
        let Some(json) = self.store.get(&keys::match_record(match_id)).await? else {
            return Ok(None);
        };
        let record = serde_json::from_str(&json).map_err(|e| MatchmakingError::Store {
            message: format!("Unreadable match record {}: {}", match_id, e),
        })?;
        Ok(Some(record))
    }

    async fn require_match(&self, match_id: MatchId) -> Result<MatchRecord> {
        self.get_match(match_id).await?.ok_or_else(|| {
            MatchmakingError::MatchCreationFailed {
                reason: format!("Match {} does not exist", match_id),
            }
            .into()
        })
    }

    async fn save(&self, record: &MatchRecord) -> Result<()> {
        let json = serde_json::to_string(record).map_err(|e| MatchmakingError::InternalError {
            message: format!("Failed to serialize match {}: {}", record.id, e),
        })?;
        self.store.set(&keys::match_record(record.id), &json, None).await
    }
}

#[async_trait]
impl MatchService for StoreMatchService {
    async fn create_match(
        &self,
        match_type: MatchType,
        options: MatchOptions,
    ) -> Result<CreatedMatch> {
        let created = CreatedMatch {
            id: Uuid::new_v4(),
            lineup1_id: Uuid::new_v4(),
            lineup2_id: Uuid::new_v4(),
        };
        let record = MatchRecord {
            id: created.id,
            match_type,
            options,
            lineup1_id: created.lineup1_id,
            lineup2_id: created.lineup2_id,
            lineup1: Vec::new(),
            lineup2: Vec::new(),
            live: false,
            created_at: current_timestamp(),
        };
        self.save(&record).await?;
        for lineup_id in [created.lineup1_id, created.lineup2_id] {
            self.store
                .set(&keys::lineup_match(lineup_id), &created.id.to_string(), None)
                .await?;
        }

        info!(
            "Created match {} ({}, {} rounds, bo{})",
            created.id, match_type, record.options.rules.max_rounds, record.options.rules.best_of
        );
        Ok(created)
    }

    async fn insert_lineup_players(&self, lineup_id: LineupId, steam_ids: &[SteamId]) -> Result<()> {
        let match_id: MatchId = self
            .store
            .get(&keys::lineup_match(lineup_id))
            .await?
            .and_then(|id| id.parse().ok())
            .ok_or_else(|| MatchmakingError::MatchCreationFailed {
                reason: format!("Lineup {} does not exist", lineup_id),
            })?;

        let mut record = self.require_match(match_id).await?;
        if record.lineup1_id == lineup_id {
            record.lineup1 = steam_ids.to_vec();
        } else {
            record.lineup2 = steam_ids.to_vec();
        }
        self.save(&record).await
    }

    async fn set_match_live(&self, match_id: MatchId) -> Result<()> {
        let mut record = self.require_match(match_id).await?;
        record.live = true;
        self.save(&record).await?;

        let event = MatchLive {
            match_id,
            match_type: record.match_type,
            region: record.options.region.clone(),
            lineup1: record.lineup1,
            lineup2: record.lineup2,
            timestamp: current_timestamp(),
        };
        if let Err(e) = self.publisher.publish_match_live(event).await {
            warn!("Failed to announce live match {}: {}", match_id, e);
        }
        Ok(())
    }
}
