//! Tokio timer backed job scheduler
//!
//! Due jobs are delivered on an unbounded channel; the service runs a worker
//! that drains it. Firing and cancellation take the same lock, so a job that
//! was cancelled is never delivered and `cancel_delayed` reports `false` once
//! a job has been handed to the channel.

use crate::error::{MatchmakingError, Result};
use crate::jobs::{DueJob, Job, JobScheduler};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::debug;

struct PendingTimer {
    generation: u64,
    handle: AbortHandle,
}

/// Delayed job scheduler driven by tokio timers
pub struct TokioJobScheduler {
    timers: Arc<Mutex<HashMap<String, PendingTimer>>>,
    due_tx: mpsc::UnboundedSender<DueJob>,
    generation: AtomicU64,
}

impl TokioJobScheduler {
    /// Create a scheduler and the receiver its due jobs arrive on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DueJob>) {
        let (due_tx, due_rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            timers: Arc::new(Mutex::new(HashMap::new())),
            due_tx,
            generation: AtomicU64::new(0),
        };
        (scheduler, due_rx)
    }

    /// Number of timers still waiting to fire
    pub fn pending_count(&self) -> usize {
        self.timers.lock().len()
    }

    pub fn is_pending(&self, job_id: &str) -> bool {
        self.timers.lock().contains_key(job_id)
    }
}

#[async_trait]
impl JobScheduler for TokioJobScheduler {
    async fn schedule_delayed(&self, job_id: &str, job: Job, delay: Duration) -> Result<()> {
        if self.due_tx.is_closed() {
            return Err(MatchmakingError::InternalError {
                message: "Job channel closed".to_string(),
            }
            .into());
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let timers = self.timers.clone();
        let due_tx = self.due_tx.clone();
        let id = job_id.to_string();

        debug!(
            "Scheduling job {} ({}) in {:.1}s",
            job_id,
            job.name(),
            delay.as_secs_f64()
        );

        // Hold the map lock across spawn + insert so the timer cannot observe
        // the map before its own entry exists.
        let mut pending = self.timers.lock();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut pending = timers.lock();
            let current = pending
                .get(&id)
                .is_some_and(|timer| timer.generation == generation);
            if current {
                pending.remove(&id);
                let _ = due_tx.send(DueJob { job_id: id, job });
            }
        });

        if let Some(previous) = pending.insert(
            job_id.to_string(),
            PendingTimer {
                generation,
                handle: task.abort_handle(),
            },
        ) {
            previous.handle.abort();
            debug!("Replaced pending timer for job {}", job_id);
        }

        Ok(())
    }

    async fn cancel_delayed(&self, job_id: &str) -> Result<bool> {
        match self.timers.lock().remove(job_id) {
            Some(timer) => {
                timer.handle.abort();
                debug!("Cancelled job {}", job_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
