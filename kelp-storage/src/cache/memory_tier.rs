//! Bounded in-process tier.
//!
//! Each cache type holds at most `capacity_per_type` entries. When an insert
//! goes over capacity the oldest inserted entries are dropped (FIFO, not LRU).
//! Entries carry the expiry of the record they mirror and are never served
//! past it.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use kelp_core::{CacheKey, CacheType, KelpResult, StorageError, Timestamp};
use serde_json::Value;

#[derive(Debug, Clone)]
struct TierEntry {
    value: Value,
    expires_at: Timestamp,
}

#[derive(Debug, Default)]
struct TierShard {
    entries: HashMap<CacheKey, TierEntry>,
    /// Insertion order; holds exactly the keys in `entries`.
    order: VecDeque<CacheKey>,
}

impl TierShard {
    fn remove(&mut self, key: &CacheKey) -> bool {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k != key);
            true
        } else {
            false
        }
    }
}

/// In-process cache shared by the retention manager and policy engine.
#[derive(Debug)]
pub struct MemoryTier {
    capacity_per_type: usize,
    shards: RwLock<HashMap<CacheType, TierShard>>,
    evictions: AtomicU64,
}

impl MemoryTier {
    pub fn new(capacity_per_type: usize) -> Self {
        Self {
            capacity_per_type,
            shards: RwLock::new(HashMap::new()),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn capacity_per_type(&self) -> usize {
        self.capacity_per_type
    }

    /// Fresh value for a key, if held.
    pub fn get(
        &self,
        cache_type: CacheType,
        key: &CacheKey,
        now: Timestamp,
    ) -> KelpResult<Option<Value>> {
        let shards = self.shards.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(shards
            .get(&cache_type)
            .and_then(|shard| shard.entries.get(key))
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value.clone()))
    }

    /// Insert or replace an entry, evicting the oldest when over capacity.
    pub fn insert(
        &self,
        cache_type: CacheType,
        key: CacheKey,
        value: Value,
        expires_at: Timestamp,
    ) -> KelpResult<()> {
        if self.capacity_per_type == 0 {
            return Ok(());
        }
        let mut shards = self.shards.write().map_err(|_| StorageError::LockPoisoned)?;
        let shard = shards.entry(cache_type).or_default();
        let entry = TierEntry { value, expires_at };
        if shard.entries.insert(key.clone(), entry).is_none() {
            shard.order.push_back(key);
        }
        while shard.entries.len() > self.capacity_per_type {
            match shard.order.pop_front() {
                Some(oldest) => {
                    shard.entries.remove(&oldest);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }
        Ok(())
    }

    /// Drop entries, returning how many were present.
    pub fn remove(&self, cache_type: CacheType, keys: &[CacheKey]) -> KelpResult<u64> {
        let mut shards = self.shards.write().map_err(|_| StorageError::LockPoisoned)?;
        let Some(shard) = shards.get_mut(&cache_type) else {
            return Ok(0);
        };
        Ok(keys.iter().filter(|key| shard.remove(key)).count() as u64)
    }

    /// Drop expired entries across all types.
    pub fn purge_expired(&self, now: Timestamp) -> KelpResult<u64> {
        let mut shards = self.shards.write().map_err(|_| StorageError::LockPoisoned)?;
        let mut purged = 0;
        for shard in shards.values_mut() {
            let expired: Vec<CacheKey> = shard
                .entries
                .iter()
                .filter(|(_, e)| e.expires_at <= now)
                .map(|(k, _)| k.clone())
                .collect();
            for key in &expired {
                shard.remove(key);
            }
            purged += expired.len() as u64;
        }
        Ok(purged)
    }

    pub fn len(&self, cache_type: CacheType) -> usize {
        self.shards
            .read()
            .map(|s| s.get(&cache_type).map_or(0, |shard| shard.entries.len()))
            .unwrap_or(0)
    }

    pub fn total_len(&self) -> usize {
        self.shards
            .read()
            .map(|s| s.values().map(|shard| shard.entries.len()).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.total_len() == 0
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn clear(&self) -> KelpResult<()> {
        self.shards
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .clear();
        Ok(())
    }
}
