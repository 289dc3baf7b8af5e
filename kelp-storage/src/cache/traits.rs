//! Persistent record store trait and its statistics types.

use async_trait::async_trait;
use kelp_core::{CacheKey, CacheRecord, CacheType, KelpResult, RecordPredicate, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Action applied to a batch of records by a retention policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchAction {
    Delete,
    /// Move into the archive collection.
    Archive,
    /// Re-encode the payload with zstd at the given level.
    Compress { level: i32 },
    /// Move into another cache type.
    Migrate { to: CacheType },
}

/// Result of one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Records the action changed.
    pub affected: u64,
    /// Bytes no longer held in the live collections.
    pub bytes_freed: u64,
}

impl BatchOutcome {
    pub fn merge(&mut self, other: BatchOutcome) {
        self.affected += other.affected;
        self.bytes_freed += other.bytes_freed;
    }
}

/// A record selected by a predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedRecord {
    pub cache_key: CacheKey,
    pub size_bytes: u64,
}

/// Occupancy of one collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeStats {
    pub records: u64,
    pub bytes: u64,
    pub compressed_records: u64,
    pub avg_quality: f64,
}

/// Occupancy of the whole store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub per_type: BTreeMap<CacheType, TypeStats>,
    pub archived_records: u64,
    pub archived_bytes: u64,
}

impl StoreStats {
    pub fn total_records(&self) -> u64 {
        self.per_type.values().map(|s| s.records).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.per_type.values().map(|s| s.bytes).sum()
    }

    /// Record-weighted average quality across live collections.
    pub fn avg_quality(&self) -> f64 {
        let records = self.total_records();
        if records == 0 {
            return 0.0;
        }
        let weighted: f64 = self
            .per_type
            .values()
            .map(|s| s.avg_quality * s.records as f64)
            .sum();
        weighted / records as f64
    }

    /// Fold one record into the running statistics for its type.
    pub(crate) fn observe(&mut self, record: &CacheRecord) {
        let entry = self.per_type.entry(record.cache_type).or_default();
        let n = entry.records as f64;
        entry.avg_quality = (entry.avg_quality * n + record.quality_score) / (n + 1.0);
        entry.records += 1;
        entry.bytes += record.size_bytes;
        if record.payload.is_compressed() {
            entry.compressed_records += 1;
        }
    }
}

/// Backing store for cache records, one collection per [`CacheType`].
///
/// Implementations must be safe for concurrent use. Each call is atomic:
/// a `put` writes the whole record or nothing, and `apply_batch` commits the
/// whole batch or nothing.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Fetch a record regardless of freshness.
    async fn get(&self, cache_type: CacheType, key: &CacheKey) -> KelpResult<Option<CacheRecord>>;

    /// Insert or replace a record.
    async fn put(&self, record: &CacheRecord) -> KelpResult<()>;

    /// Refresh `last_accessed_at` and bump `access_count`.
    ///
    /// Returns false when the record no longer exists.
    async fn touch(&self, cache_type: CacheType, key: &CacheKey, at: Timestamp)
        -> KelpResult<bool>;

    /// Number of live records of a type.
    async fn count(&self, cache_type: CacheType) -> KelpResult<u64>;

    /// All records of `predicate.cache_type` the predicate accepts.
    async fn find_matching(&self, predicate: &RecordPredicate) -> KelpResult<Vec<MatchedRecord>>;

    /// Apply an action to the given keys. Missing keys are skipped.
    async fn apply_batch(
        &self,
        cache_type: CacheType,
        keys: &[CacheKey],
        action: BatchAction,
    ) -> KelpResult<BatchOutcome>;

    /// Occupancy statistics.
    async fn stats(&self) -> KelpResult<StoreStats>;

    /// Cheap liveness probe.
    async fn ping(&self) -> KelpResult<()>;
}
