//! In-process record store.
//!
//! Backs edge deployments and tests. Outages and latency can be simulated so
//! callers can exercise their fail-open paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use kelp_core::{
    CacheKey, CacheRecord, CacheType, KelpResult, RecordPredicate, StorageError, Timestamp,
};

use super::codec;
use super::traits::{BatchAction, BatchOutcome, MatchedRecord, PersistentStore, StoreStats};

type Collections = HashMap<CacheType, HashMap<CacheKey, CacheRecord>>;

/// Record store kept entirely in memory.
#[derive(Debug)]
pub struct InMemoryRecordStore {
    collections: RwLock<Collections>,
    archive: RwLock<HashMap<(CacheType, CacheKey), CacheRecord>>,
    available: AtomicBool,
    latency_ms: AtomicU64,
    operations: AtomicU64,
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            archive: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
            operations: AtomicU64::new(0),
        }
    }

    /// Simulate an outage: while unavailable every call fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Calls received, including failed ones.
    pub fn operations(&self) -> u64 {
        self.operations.load(Ordering::Relaxed)
    }

    pub fn archived(&self, cache_type: CacheType, key: &CacheKey) -> Option<CacheRecord> {
        self.archive
            .read()
            .ok()
            .and_then(|a| a.get(&(cache_type, key.clone())).cloned())
    }

    async fn enter(&self) -> KelpResult<()> {
        self.operations.fetch_add(1, Ordering::Relaxed);
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable {
                reason: "in-memory store marked unavailable".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl PersistentStore for InMemoryRecordStore {
    async fn get(&self, cache_type: CacheType, key: &CacheKey) -> KelpResult<Option<CacheRecord>> {
        self.enter().await?;
        let collections = self.collections.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(collections.get(&cache_type).and_then(|c| c.get(key)).cloned())
    }

    async fn put(&self, record: &CacheRecord) -> KelpResult<()> {
        self.enter().await?;
        let mut collections = self
            .collections
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        collections
            .entry(record.cache_type)
            .or_default()
            .insert(record.cache_key.clone(), record.clone());
        Ok(())
    }

    async fn touch(
        &self,
        cache_type: CacheType,
        key: &CacheKey,
        at: Timestamp,
    ) -> KelpResult<bool> {
        self.enter().await?;
        let mut collections = self
            .collections
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        match collections.get_mut(&cache_type).and_then(|c| c.get_mut(key)) {
            Some(record) => {
                record.touch(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn count(&self, cache_type: CacheType) -> KelpResult<u64> {
        self.enter().await?;
        let collections = self.collections.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(collections.get(&cache_type).map_or(0, |c| c.len() as u64))
    }

    async fn find_matching(&self, predicate: &RecordPredicate) -> KelpResult<Vec<MatchedRecord>> {
        self.enter().await?;
        let collections = self.collections.read().map_err(|_| StorageError::LockPoisoned)?;
        let Some(collection) = collections.get(&predicate.cache_type) else {
            return Ok(Vec::new());
        };
        let mut matched: Vec<MatchedRecord> = collection
            .values()
            .filter(|record| predicate.matches(record))
            .map(|record| MatchedRecord {
                cache_key: record.cache_key.clone(),
                size_bytes: record.size_bytes,
            })
            .collect();
        matched.sort_by(|a, b| a.cache_key.cmp(&b.cache_key));
        Ok(matched)
    }

    async fn apply_batch(
        &self,
        cache_type: CacheType,
        keys: &[CacheKey],
        action: BatchAction,
    ) -> KelpResult<BatchOutcome> {
        self.enter().await?;
        let mut collections = self
            .collections
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        let mut archive = self.archive.write().map_err(|_| StorageError::LockPoisoned)?;

        // Stage on a copy so a failing record leaves the batch unapplied.
        let mut staged = collections.get(&cache_type).cloned().unwrap_or_default();
        let mut migrated = Vec::new();
        let mut archived = Vec::new();
        let mut outcome = BatchOutcome::default();

        for key in keys {
            match action {
                BatchAction::Delete => {
                    if let Some(record) = staged.remove(key) {
                        outcome.affected += 1;
                        outcome.bytes_freed += record.size_bytes;
                    }
                }
                BatchAction::Archive => {
                    if let Some(record) = staged.remove(key) {
                        outcome.affected += 1;
                        outcome.bytes_freed += record.size_bytes;
                        archived.push(record);
                    }
                }
                BatchAction::Compress { level } => {
                    if let Some(record) = staged.get_mut(key) {
                        if let Some(saved) = codec::compress_record(record, level)? {
                            outcome.affected += 1;
                            outcome.bytes_freed += saved;
                        }
                    }
                }
                BatchAction::Migrate { to } => {
                    if let Some(mut record) = staged.remove(key) {
                        record.cache_type = to;
                        outcome.affected += 1;
                        migrated.push(record);
                    }
                }
            }
        }

        collections.insert(cache_type, staged);
        for record in archived {
            archive.insert((record.cache_type, record.cache_key.clone()), record);
        }
        if let BatchAction::Migrate { to } = action {
            let target = collections.entry(to).or_default();
            for record in migrated {
                target.insert(record.cache_key.clone(), record);
            }
        }
        Ok(outcome)
    }

    async fn stats(&self) -> KelpResult<StoreStats> {
        self.enter().await?;
        let collections = self.collections.read().map_err(|_| StorageError::LockPoisoned)?;
        let archive = self.archive.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut stats = StoreStats::default();
        for record in collections.values().flat_map(|c| c.values()) {
            stats.observe(record);
        }
        stats.archived_records = archive.len() as u64;
        stats.archived_bytes = archive.values().map(|r| r.size_bytes).sum();
        Ok(stats)
    }

    async fn ping(&self) -> KelpResult<()> {
        self.enter().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kelp_core::{PolicyAction, RetentionPolicy};
    use serde_json::json;

    fn record(id: &str, quality: f64) -> CacheRecord {
        CacheRecord::new(
            CacheKey::derive(CacheType::Inference, id, &json!({})),
            CacheType::Inference,
            id,
            json!({"prediction": id, "padding": "x".repeat(200)}),
            quality,
            90,
            Duration::from_secs(3600),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_put_get_touch() {
        let store = InMemoryRecordStore::new();
        let rec = record("a", 0.5);
        store.put(&rec).await.unwrap();

        let later = Utc::now() + chrono::Duration::seconds(10);
        assert!(store.touch(CacheType::Inference, &rec.cache_key, later).await.unwrap());
        let fetched = store.get(CacheType::Inference, &rec.cache_key).await.unwrap().unwrap();
        assert_eq!(fetched.access_count, 2);
        assert_eq!(fetched.last_accessed_at, later);

        let missing = CacheKey::derive(CacheType::Inference, "zz", &json!({}));
        assert!(!store.touch(CacheType::Inference, &missing, later).await.unwrap());
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let store = InMemoryRecordStore::new();
        store.set_available(false);
        let err = store.put(&record("a", 0.5)).await.unwrap_err();
        assert!(err.is_store_unavailable());
        store.set_available(true);
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_archive_moves_records() {
        let store = InMemoryRecordStore::new();
        let rec = record("a", 0.5);
        store.put(&rec).await.unwrap();

        let outcome = store
            .apply_batch(CacheType::Inference, &[rec.cache_key.clone()], BatchAction::Archive)
            .await
            .unwrap();
        assert_eq!(outcome.affected, 1);
        assert_eq!(outcome.bytes_freed, rec.size_bytes);
        assert_eq!(store.count(CacheType::Inference).await.unwrap(), 0);
        assert!(store.archived(CacheType::Inference, &rec.cache_key).is_some());
        assert_eq!(store.stats().await.unwrap().archived_records, 1);
    }

    #[tokio::test]
    async fn test_compress_then_decode() {
        let store = InMemoryRecordStore::new();
        let rec = record("a", 0.5);
        store.put(&rec).await.unwrap();

        let outcome = store
            .apply_batch(
                CacheType::Inference,
                &[rec.cache_key.clone()],
                BatchAction::Compress { level: 3 },
            )
            .await
            .unwrap();
        assert_eq!(outcome.affected, 1);
        assert!(outcome.bytes_freed > 0);

        let stored = store.get(CacheType::Inference, &rec.cache_key).await.unwrap().unwrap();
        assert!(stored.payload.is_compressed());
        assert_eq!(
            codec::decode_payload(&stored.payload).unwrap(),
            codec::decode_payload(&rec.payload).unwrap()
        );

        // Second pass is a no-op.
        let again = store
            .apply_batch(
                CacheType::Inference,
                &[rec.cache_key.clone()],
                BatchAction::Compress { level: 3 },
            )
            .await
            .unwrap();
        assert_eq!(again.affected, 0);
    }

    #[tokio::test]
    async fn test_migrate_changes_collection() {
        let store = InMemoryRecordStore::new();
        let rec = record("a", 0.5);
        store.put(&rec).await.unwrap();
        store
            .apply_batch(
                CacheType::Inference,
                &[rec.cache_key.clone()],
                BatchAction::Migrate { to: CacheType::AggregatedSeries },
            )
            .await
            .unwrap();
        assert!(store.get(CacheType::Inference, &rec.cache_key).await.unwrap().is_none());
        let moved = store
            .get(CacheType::AggregatedSeries, &rec.cache_key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(moved.cache_type, CacheType::AggregatedSeries);
    }

    #[tokio::test]
    async fn test_find_matching_uses_predicate() {
        let store = InMemoryRecordStore::new();
        store.put(&record("low", 0.1)).await.unwrap();
        store.put(&record("high", 0.95)).await.unwrap();

        let policy = RetentionPolicy::new("p", "p", CacheType::Inference, PolicyAction::Delete)
            .with_retention_days(0)
            .with_min_quality(0.5);
        // retention 0 requires expiry, nothing is expired yet
        assert!(store.find_matching(&policy.predicate(Utc::now())).await.unwrap().is_empty());

        let later = Utc::now() + chrono::Duration::hours(2);
        let matched = store.find_matching(&policy.predicate(later)).await.unwrap();
        assert_eq!(matched.len(), 1);
    }
}
