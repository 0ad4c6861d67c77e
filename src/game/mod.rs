//! Match persistence collaborator
//!
//! The matchmaking core never builds matches itself. Once every player of a
//! ready check has acknowledged, it asks a [`MatchService`] to create the
//! match with the type's default rules, fill both lineups and mark it live.

pub mod store;

use crate::error::Result;
use crate::types::{ConfirmationId, LineupId, MatchId, MatchType, Region, SteamId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use store::StoreMatchService;

/// Default rules a match of a given type is created with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRules {
    pub max_rounds: u32,
    pub best_of: u32,
    pub overtime: bool,
}

impl MatchRules {
    pub fn for_type(match_type: MatchType) -> Self {
        match match_type {
            MatchType::Competitive => Self {
                max_rounds: 24,
                best_of: 1,
                overtime: true,
            },
            MatchType::Wingman => Self {
                max_rounds: 16,
                best_of: 1,
                overtime: true,
            },
            MatchType::Duel => Self {
                max_rounds: 16,
                best_of: 3,
                overtime: false,
            },
        }
    }
}

/// Everything the match collaborator needs beyond the type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchOptions {
    pub region: Region,
    pub rules: MatchRules,
    pub confirmation_id: ConfirmationId,
}

/// Ids handed back by a successful match creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedMatch {
    pub id: MatchId,
    pub lineup1_id: LineupId,
    pub lineup2_id: LineupId,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MatchService: Send + Sync {
    async fn create_match(&self, match_type: MatchType, options: MatchOptions)
        -> Result<CreatedMatch>;

    async fn insert_lineup_players(&self, lineup_id: LineupId, steam_ids: &[SteamId])
        -> Result<()>;

    async fn set_match_live(&self, match_id: MatchId) -> Result<()>;
}
