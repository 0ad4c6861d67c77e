//! Delayed job scheduling
//!
//! Ready-check timeouts, scheduler re-runs and disconnect removals are all
//! delayed jobs keyed by a job id. Scheduling under an id that already has a
//! pending timer replaces that timer.

pub mod scheduler;

use crate::error::Result;
use crate::types::{ConfirmationId, LobbyId, MatchType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use scheduler::TokioJobScheduler;

/// Work performed when a delayed job comes due
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum Job {
    CancelConfirmation { confirmation_id: ConfirmationId },
    Matchmake { match_type: MatchType, region: String },
    RemoveDisconnectedLobby { lobby_id: LobbyId },
}

impl Job {
    /// Job name used in logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            Job::CancelConfirmation { .. } => "cancel_confirmation",
            Job::Matchmake { .. } => "matchmake",
            Job::RemoveDisconnectedLobby { .. } => "remove_disconnected_lobby",
        }
    }

    /// Id this job is scheduled under; one pending timer per id
    pub fn job_id(&self) -> String {
        match self {
            Job::CancelConfirmation { confirmation_id } => {
                confirmation_timeout_job_id(*confirmation_id)
            }
            Job::Matchmake { match_type, region } => matchmake_job_id(*match_type, region),
            Job::RemoveDisconnectedLobby { lobby_id } => disconnect_job_id(*lobby_id),
        }
    }
}

pub fn confirmation_timeout_job_id(confirmation_id: ConfirmationId) -> String {
    format!("confirmation-timeout:{}", confirmation_id)
}

pub fn matchmake_job_id(match_type: MatchType, region: &str) -> String {
    format!("matchmake:{}:{}", match_type, region)
}

pub fn disconnect_job_id(lobby_id: LobbyId) -> String {
    format!("lobby-disconnect:{}", lobby_id)
}

/// A job whose delay has elapsed
#[derive(Debug, Clone, PartialEq)]
pub struct DueJob {
    pub job_id: String,
    pub job: Job,
}

/// Idempotent, re-schedulable delayed execution
#[async_trait]
pub trait JobScheduler: Send + Sync {
    /// Schedule `job` to come due after `delay`, replacing any timer under `job_id`
    async fn schedule_delayed(&self, job_id: &str, job: Job, delay: Duration) -> Result<()>;

    /// Cancel the pending timer for `job_id`; false when nothing was pending
    async fn cancel_delayed(&self, job_id: &str) -> Result<bool>;
}
