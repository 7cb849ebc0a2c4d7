//! In-process store used for tests and storeless development.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::Store;
use crate::error::Result;

/// Counter entry with its expiry deadline.
struct CounterEntry {
    value: u64,
    expires_at: Instant,
}

/// A `Store` backed by process memory.
///
/// Counters honor the same create-with-TTL semantics as the Redis driver so
/// window expiry can be exercised without a network round trip. Useless for
/// multi-instance coordination, which is the point of the Redis backend.
#[derive(Default)]
pub struct MemoryStore {
    counters: DashMap<String, CounterEntry>,
    sets: Mutex<HashMap<String, HashSet<String>>>,
    scalars: Mutex<HashMap<String, String>>,
    hashes: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter, ignoring expiry.
    pub fn counter(&self, key: &str) -> Option<u64> {
        self.counters.get(key).map(|entry| entry.value)
    }

    /// Seed a counter directly with a long-lived entry.
    pub fn set_counter(&self, key: &str, value: u64) {
        self.counters.insert(
            key.to_string(),
            CounterEntry {
                value,
                expires_at: Instant::now() + Duration::from_secs(3600),
            },
        );
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn incr(&self, key: &str, delta: u64, ttl: Duration) -> Result<u64> {
        let now = Instant::now();
        let ttl = ttl.max(Duration::from_secs(1));

        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| CounterEntry {
                value: 0,
                expires_at: now + ttl,
            });

        if entry.expires_at <= now {
            entry.value = 0;
            entry.expires_at = now + ttl;
        }
        entry.value += delta;
        Ok(entry.value)
    }

    async fn set_add(&self, set: &str, members: &[String]) -> Result<()> {
        let mut sets = self.sets.lock();
        let entry = sets.entry(set.to_string()).or_default();
        for member in members {
            entry.insert(member.clone());
        }
        Ok(())
    }

    async fn set_remove(&self, set: &str, members: &[String]) -> Result<()> {
        let mut sets = self.sets.lock();
        if let Some(entry) = sets.get_mut(set) {
            for member in members {
                entry.remove(member);
            }
        }
        Ok(())
    }

    async fn set_members(&self, set: &str) -> Result<Vec<String>> {
        let sets = self.sets.lock();
        Ok(sets
            .get(set)
            .map(|entry| entry.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.scalars.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.scalars.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut hashes = self.hashes.lock();
        hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        Ok(self.hashes.lock().get(key).cloned().unwrap_or_default())
    }
}
