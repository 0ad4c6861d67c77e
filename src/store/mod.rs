//! Shared coordination store
//!
//! Queues, locks and confirmations live behind this trait rather than in
//! process memory, so independent matchmaking workers can run against the
//! same state. Every write that can carry an expiry takes one, which is what
//! lets a crashed worker's claims lapse on their own.

pub mod keys;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

/// Key/value, set and sorted-set primitives with per-key expiry
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Write `value` only if `key` is absent; true when the write happened
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Unconditionally write `value`, replacing any expiry with `ttl`
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Reset the expiry of an existing key; false when the key is absent
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Remove a key of any kind; true when something was removed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove a string key only while it still holds `expected`
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool>;

    /// Replace a string key holding `expected` with `value` and a fresh expiry
    async fn compare_and_set(
        &self,
        key: &str,
        expected: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool>;

    async fn sorted_add(&self, key: &str, member: &str, score: f64) -> Result<()>;

    async fn sorted_remove(&self, key: &str, member: &str) -> Result<bool>;

    /// All members ordered by descending score
    async fn sorted_members_desc(&self, key: &str) -> Result<Vec<(String, f64)>>;

    async fn sorted_len(&self, key: &str) -> Result<usize>;

    async fn set_add(&self, key: &str, member: &str) -> Result<bool>;

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool>;

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool>;

    async fn set_members(&self, key: &str) -> Result<Vec<String>>;

    async fn set_len(&self, key: &str) -> Result<usize>;
}
