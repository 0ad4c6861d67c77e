//! In-memory coordination store
//!
//! Suitable for a single-instance deployment and for tests. Expiry is checked
//! against the tokio clock, so paused-time tests can step over TTLs.

use crate::error::{MatchmakingError, Result};
use crate::store::CoordinationStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Set(HashSet<String>),
    Sorted(HashMap<String, f64>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Coordination store backed by a process-local map
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys (for tests and diagnostics)
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn wrong_type(key: &str) -> anyhow::Error {
        MatchmakingError::Store {
            message: format!("WRONGTYPE operation against key {}", key),
        }
        .into()
    }

    /// Drop the entry for `key` if it has lapsed, then hand back the map
    fn purge_expired(entries: &mut HashMap<String, Entry>, key: &str) {
        let now = Instant::now();
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
        }
    }

    fn with_set<T>(
        &self,
        key: &str,
        create: bool,
        f: impl FnOnce(&mut HashSet<String>) -> T,
    ) -> Result<Option<T>> {
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries, key);
        if create && !entries.contains_key(key) {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Set(HashSet::new()),
                    expires_at: None,
                },
            );
        }
        let Some(entry) = entries.get_mut(key) else {
            return Ok(None);
        };
        let result = match &mut entry.value {
            Value::Set(set) => f(set),
            _ => return Err(Self::wrong_type(key)),
        };
        if matches!(&entry.value, Value::Set(set) if set.is_empty()) {
            entries.remove(key);
        }
        Ok(Some(result))
    }

    fn with_sorted<T>(
        &self,
        key: &str,
        create: bool,
        f: impl FnOnce(&mut HashMap<String, f64>) -> T,
    ) -> Result<Option<T>> {
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries, key);
        if create && !entries.contains_key(key) {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Sorted(HashMap::new()),
                    expires_at: None,
                },
            );
        }
        let Some(entry) = entries.get_mut(key) else {
            return Ok(None);
        };
        let result = match &mut entry.value {
            Value::Sorted(sorted) => f(sorted),
            _ => return Err(Self::wrong_type(key)),
        };
        if matches!(&entry.value, Value::Sorted(sorted) if sorted.is_empty()) {
            entries.remove(key);
        }
        Ok(Some(result))
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries, key);
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut entries = self.entries.lock();
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries, key);
        match entries.get(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Text(text),
                ..
            }) => Ok(Some(text.clone())),
            Some(_) => Err(Self::wrong_type(key)),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries, key);
        match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries, key);
        Ok(entries.remove(key).is_some())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries, key);
        let matches = matches!(
            entries.get(key),
            Some(Entry { value: Value::Text(text), .. }) if text == expected
        );
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries, key);
        match entries.get_mut(key) {
            Some(entry) if matches!(&entry.value, Value::Text(text) if text == expected) => {
                entry.value = Value::Text(value.to_string());
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn sorted_add(&self, key: &str, member: &str, score: f64) -> Result<()> {
        self.with_sorted(key, true, |sorted| {
            sorted.insert(member.to_string(), score);
        })?;
        Ok(())
    }

    async fn sorted_remove(&self, key: &str, member: &str) -> Result<bool> {
        Ok(self
            .with_sorted(key, false, |sorted| sorted.remove(member).is_some())?
            .unwrap_or(false))
    }

    async fn sorted_members_desc(&self, key: &str) -> Result<Vec<(String, f64)>> {
        let mut members = self
            .with_sorted(key, false, |sorted| {
                sorted
                    .iter()
                    .map(|(member, score)| (member.clone(), *score))
                    .collect::<Vec<_>>()
            })?
            .unwrap_or_default();
        members.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(members)
    }

    async fn sorted_len(&self, key: &str) -> Result<usize> {
        Ok(self
            .with_sorted(key, false, |sorted| sorted.len())?
            .unwrap_or(0))
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool> {
        Ok(self
            .with_set(key, true, |set| set.insert(member.to_string()))?
            .unwrap_or(false))
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool> {
        Ok(self
            .with_set(key, false, |set| set.remove(member))?
            .unwrap_or(false))
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool> {
        Ok(self
            .with_set(key, false, |set| set.contains(member))?
            .unwrap_or(false))
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let mut members = self
            .with_set(key, false, |set| set.iter().cloned().collect::<Vec<_>>())?
            .unwrap_or_default();
        members.sort();
        Ok(members)
    }

    async fn set_len(&self, key: &str) -> Result<usize> {
        Ok(self.with_set(key, false, |set| set.len())?.unwrap_or(0))
    }
}
