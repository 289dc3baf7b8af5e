//! LMDB-backed record store.
//!
//! Uses heed with one named database per cache type plus an `archive`
//! database. Values are JSON-encoded [`CacheRecord`]s; keys are the 32-char
//! cache key (archive keys are prefixed with the cache type).
//!
//! Every trait call runs in a single LMDB transaction, so a batch is either
//! fully committed or not at all.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use kelp_core::{
    CacheKey, CacheRecord, CacheType, KelpError, KelpResult, RecordPredicate, StorageError,
    Timestamp,
};

use super::codec;
use super::traits::{BatchAction, BatchOutcome, MatchedRecord, PersistentStore, StoreStats};

const ARCHIVE_DB: &str = "archive";

/// Error type for LMDB store setup and transactions.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    #[error("Failed to open database {name}: {reason}")]
    DbOpen { name: String, reason: String },

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for KelpError {
    fn from(e: LmdbStoreError) -> Self {
        KelpError::Storage(StorageError::Backend {
            reason: e.to_string(),
        })
    }
}

fn txn_err(e: heed::Error) -> LmdbStoreError {
    LmdbStoreError::Transaction(e.to_string())
}

/// Persistent store on a local LMDB environment.
pub struct LmdbRecordStore {
    env: Env,
    collections: HashMap<CacheType, Database<Bytes, Bytes>>,
    archive: Database<Bytes, Bytes>,
}

impl LmdbRecordStore {
    /// Open (or create) the store under `path` with a map size of
    /// `max_size_mb` megabytes.
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment directory is owned by this process and
        // opened once per store.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(CacheType::ALL.len() as u32 + 1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let mut collections = HashMap::new();
        for cache_type in CacheType::ALL {
            let db: Database<Bytes, Bytes> = env
                .create_database(&mut wtxn, Some(cache_type.as_str()))
                .map_err(|e| LmdbStoreError::DbOpen {
                    name: cache_type.to_string(),
                    reason: e.to_string(),
                })?;
            collections.insert(cache_type, db);
        }
        let archive: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some(ARCHIVE_DB))
            .map_err(|e| LmdbStoreError::DbOpen {
                name: ARCHIVE_DB.to_string(),
                reason: e.to_string(),
            })?;
        wtxn.commit().map_err(txn_err)?;

        tracing::info!(path = %path.as_ref().display(), max_size_mb, "LMDB record store opened");

        Ok(Self {
            env,
            collections,
            archive,
        })
    }

    fn db(&self, cache_type: CacheType) -> Result<Database<Bytes, Bytes>, LmdbStoreError> {
        self.collections
            .get(&cache_type)
            .copied()
            .ok_or_else(|| LmdbStoreError::DbOpen {
                name: cache_type.to_string(),
                reason: "database not opened".to_string(),
            })
    }

    /// Run one transaction on the blocking pool.
    ///
    /// LMDB calls block the thread (a write transaction waits for the writer
    /// lock), so they stay off the async workers and a caller's timeout can
    /// still fire. A transaction abandoned by its caller runs to completion
    /// or abort on its own.
    async fn blocking<T, F>(&self, operation: &'static str, txn: F) -> KelpResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Env) -> Result<T, LmdbStoreError> + Send + 'static,
    {
        let env = self.env.clone();
        let joined = tokio::task::spawn_blocking(move || txn(&env)).await;
        match joined {
            Ok(result) => result.map_err(KelpError::from),
            Err(e) => Err(StorageError::Backend {
                reason: format!("LMDB {operation} task failed: {e}"),
            }
            .into()),
        }
    }

    fn archive_key(cache_type: CacheType, key: &CacheKey) -> Vec<u8> {
        format!("{}:{}", cache_type.as_str(), key).into_bytes()
    }

    fn read_record(
        db: Database<Bytes, Bytes>,
        txn: &RoTxn<'_>,
        key: &CacheKey,
    ) -> Result<Option<CacheRecord>, LmdbStoreError> {
        match db.get(txn, key.as_bytes()).map_err(txn_err)? {
            Some(bytes) => serde_json::from_slice(bytes)
                .map(Some)
                .map_err(|e| LmdbStoreError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    fn write_record(
        db: Database<Bytes, Bytes>,
        txn: &mut RwTxn<'_>,
        key: &[u8],
        record: &CacheRecord,
    ) -> Result<(), LmdbStoreError> {
        let bytes =
            serde_json::to_vec(record).map_err(|e| LmdbStoreError::Serialization(e.to_string()))?;
        db.put(txn, key, &bytes).map_err(txn_err)
    }

    /// Decode every record of a database, skipping undecodable entries.
    fn scan(
        db: Database<Bytes, Bytes>,
        txn: &RoTxn<'_>,
    ) -> Result<Vec<CacheRecord>, LmdbStoreError> {
        let mut records = Vec::new();
        for entry in db.iter(txn).map_err(txn_err)? {
            let (key, bytes) = entry.map_err(txn_err)?;
            match serde_json::from_slice::<CacheRecord>(bytes) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(
                        key = %String::from_utf8_lossy(key),
                        error = %e,
                        "Skipping undecodable cache record"
                    );
                }
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl PersistentStore for LmdbRecordStore {
    async fn get(&self, cache_type: CacheType, key: &CacheKey) -> KelpResult<Option<CacheRecord>> {
        let db = self.db(cache_type)?;
        let key = key.clone();
        self.blocking("get", move |env| {
            let rtxn = env.read_txn().map_err(txn_err)?;
            Self::read_record(db, &rtxn, &key)
        })
        .await
    }

    async fn put(&self, record: &CacheRecord) -> KelpResult<()> {
        let db = self.db(record.cache_type)?;
        let record = record.clone();
        self.blocking("put", move |env| {
            let mut wtxn = env.write_txn().map_err(txn_err)?;
            Self::write_record(db, &mut wtxn, record.cache_key.as_bytes(), &record)?;
            wtxn.commit().map_err(txn_err)
        })
        .await
    }

    async fn touch(
        &self,
        cache_type: CacheType,
        key: &CacheKey,
        at: Timestamp,
    ) -> KelpResult<bool> {
        let db = self.db(cache_type)?;
        let key = key.clone();
        self.blocking("touch", move |env| {
            let mut wtxn = env.write_txn().map_err(txn_err)?;
            let Some(mut record) = Self::read_record(db, &wtxn, &key)? else {
                return Ok(false);
            };
            record.touch(at);
            Self::write_record(db, &mut wtxn, key.as_bytes(), &record)?;
            wtxn.commit().map_err(txn_err)?;
            Ok(true)
        })
        .await
    }

    async fn count(&self, cache_type: CacheType) -> KelpResult<u64> {
        let db = self.db(cache_type)?;
        self.blocking("count", move |env| {
            let rtxn = env.read_txn().map_err(txn_err)?;
            db.len(&rtxn).map_err(txn_err)
        })
        .await
    }

    async fn find_matching(&self, predicate: &RecordPredicate) -> KelpResult<Vec<MatchedRecord>> {
        let db = self.db(predicate.cache_type)?;
        let predicate = predicate.clone();
        self.blocking("find_matching", move |env| {
            let rtxn = env.read_txn().map_err(txn_err)?;
            Ok(Self::scan(db, &rtxn)?
                .into_iter()
                .filter(|record| predicate.matches(record))
                .map(|record| MatchedRecord {
                    cache_key: record.cache_key,
                    size_bytes: record.size_bytes,
                })
                .collect())
        })
        .await
    }

    async fn apply_batch(
        &self,
        cache_type: CacheType,
        keys: &[CacheKey],
        action: BatchAction,
    ) -> KelpResult<BatchOutcome> {
        let db = self.db(cache_type)?;
        let target = match action {
            BatchAction::Migrate { to } => Some(self.db(to)?),
            _ => None,
        };
        let archive = self.archive;
        let keys = keys.to_vec();
        self.blocking("apply_batch", move |env| {
            let mut wtxn = env.write_txn().map_err(txn_err)?;
            let mut outcome = BatchOutcome::default();

            for key in &keys {
                let Some(mut record) = Self::read_record(db, &wtxn, key)? else {
                    continue;
                };
                match action {
                    BatchAction::Delete => {
                        db.delete(&mut wtxn, key.as_bytes()).map_err(txn_err)?;
                        outcome.affected += 1;
                        outcome.bytes_freed += record.size_bytes;
                    }
                    BatchAction::Archive => {
                        let archive_key = Self::archive_key(cache_type, key);
                        Self::write_record(archive, &mut wtxn, &archive_key, &record)?;
                        db.delete(&mut wtxn, key.as_bytes()).map_err(txn_err)?;
                        outcome.affected += 1;
                        outcome.bytes_freed += record.size_bytes;
                    }
                    BatchAction::Compress { level } => {
                        let saved = codec::compress_record(&mut record, level)
                            .map_err(|e| LmdbStoreError::Serialization(e.to_string()))?;
                        if let Some(saved) = saved {
                            Self::write_record(db, &mut wtxn, key.as_bytes(), &record)?;
                            outcome.affected += 1;
                            outcome.bytes_freed += saved;
                        }
                    }
                    BatchAction::Migrate { to } => {
                        if let Some(target) = target {
                            record.cache_type = to;
                            Self::write_record(target, &mut wtxn, key.as_bytes(), &record)?;
                            db.delete(&mut wtxn, key.as_bytes()).map_err(txn_err)?;
                            outcome.affected += 1;
                        }
                    }
                }
            }

            // Dropping the transaction on an early return aborts it.
            wtxn.commit().map_err(txn_err)?;
            Ok(outcome)
        })
        .await
    }

    async fn stats(&self) -> KelpResult<StoreStats> {
        let collections: Vec<_> = CacheType::ALL
            .into_iter()
            .map(|cache_type| self.db(cache_type))
            .collect::<Result<_, _>>()?;
        let archive = self.archive;
        self.blocking("stats", move |env| {
            let rtxn = env.read_txn().map_err(txn_err)?;
            let mut stats = StoreStats::default();
            for db in collections {
                for record in Self::scan(db, &rtxn)? {
                    stats.observe(&record);
                }
            }
            for record in Self::scan(archive, &rtxn)? {
                stats.archived_records += 1;
                stats.archived_bytes += record.size_bytes;
            }
            Ok(stats)
        })
        .await
    }

    async fn ping(&self) -> KelpResult<()> {
        self.blocking("ping", |env| {
            env.read_txn().map_err(txn_err)?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::{CacheConfig, CacheRequest, RetentionManager};
    use chrono::Utc;
    use kelp_core::{PolicyAction, RetentionPolicy};
    use serde_json::json;
    use std::sync::{mpsc, Arc};
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn create_test_store() -> (LmdbRecordStore, TempDir) {
        let dir = TempDir::new().expect("tempdir");
        let store = LmdbRecordStore::open(dir.path(), 16).expect("open store");
        (store, dir)
    }

    fn record(cache_type: CacheType, id: &str) -> CacheRecord {
        CacheRecord::new(
            CacheKey::derive(cache_type, id, &json!({"v": 1})),
            cache_type,
            id,
            json!({"station": id, "readings": vec![20.5; 64]}),
            0.8,
            365,
            Duration::from_secs(600),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (store, _dir) = create_test_store();
        let rec = record(CacheType::Feature, "rec-1");
        store.put(&rec).await.unwrap();

        let fetched = store.get(CacheType::Feature, &rec.cache_key).await.unwrap();
        assert_eq!(fetched, Some(rec.clone()));

        // Collections are separate.
        assert!(store.get(CacheType::Training, &rec.cache_key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let rec = record(CacheType::Inference, "model-x");
        {
            let store = LmdbRecordStore::open(dir.path(), 16).unwrap();
            store.put(&rec).await.unwrap();
        }
        let store = LmdbRecordStore::open(dir.path(), 16).unwrap();
        assert_eq!(store.count(CacheType::Inference).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_touch_increments_access() {
        let (store, _dir) = create_test_store();
        let rec = record(CacheType::Feature, "rec-1");
        store.put(&rec).await.unwrap();
        let at = Utc::now() + chrono::Duration::minutes(1);
        assert!(store.touch(CacheType::Feature, &rec.cache_key, at).await.unwrap());
        let fetched = store.get(CacheType::Feature, &rec.cache_key).await.unwrap().unwrap();
        assert_eq!(fetched.access_count, 2);
    }

    #[tokio::test]
    async fn test_batch_actions() {
        let (store, _dir) = create_test_store();
        let a = record(CacheType::Training, "a");
        let b = record(CacheType::Training, "b");
        let c = record(CacheType::Training, "c");
        for r in [&a, &b, &c] {
            store.put(r).await.unwrap();
        }

        let deleted = store
            .apply_batch(CacheType::Training, &[a.cache_key.clone()], BatchAction::Delete)
            .await
            .unwrap();
        assert_eq!(deleted.affected, 1);

        let archived = store
            .apply_batch(CacheType::Training, &[b.cache_key.clone()], BatchAction::Archive)
            .await
            .unwrap();
        assert_eq!(archived.affected, 1);

        let compressed = store
            .apply_batch(
                CacheType::Training,
                &[c.cache_key.clone()],
                BatchAction::Compress { level: 3 },
            )
            .await
            .unwrap();
        assert_eq!(compressed.affected, 1);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.per_type[&CacheType::Training].records, 1);
        assert_eq!(stats.per_type[&CacheType::Training].compressed_records, 1);
        assert_eq!(stats.archived_records, 1);
    }

    #[tokio::test]
    async fn test_find_matching_and_migrate() {
        let (store, _dir) = create_test_store();
        let rec = record(CacheType::Inference, "old");
        store.put(&rec).await.unwrap();

        let policy = RetentionPolicy::new("ic", "ic", CacheType::Inference, PolicyAction::Migrate)
            .migrating_to(CacheType::AggregatedSeries);
        let later = Utc::now() + chrono::Duration::hours(1);
        let matched = store.find_matching(&policy.predicate(later)).await.unwrap();
        assert_eq!(matched.len(), 1);

        store
            .apply_batch(
                CacheType::Inference,
                &[matched[0].cache_key.clone()],
                BatchAction::Migrate { to: CacheType::AggregatedSeries },
            )
            .await
            .unwrap();
        assert_eq!(store.count(CacheType::Inference).await.unwrap(), 0);
        assert_eq!(store.count(CacheType::AggregatedSeries).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_held_writer_lock_does_not_stall_lookups() {
        let (store, _dir) = create_test_store();
        let env = store.env.clone();
        let manager = RetentionManager::new(
            Arc::new(store),
            CacheConfig::default().with_store_timeout(Duration::from_millis(20)),
        );

        // Another thread sits on the single LMDB writer lock.
        let (locked_tx, locked_rx) = mpsc::channel();
        let writer = std::thread::spawn(move || {
            let wtxn = env.write_txn().unwrap();
            locked_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(800));
            drop(wtxn);
        });
        locked_rx.recv().unwrap();

        let started = Instant::now();
        let value: serde_json::Value = manager
            .get_or_compute(CacheRequest::new(CacheType::Inference, "kelp-biomass-v2"), |_, _| async {
                Ok::<_, String>(json!({"biomass_kg": 118.5}))
            })
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert_eq!(value, json!({"biomass_kg": 118.5}));
        assert!(elapsed < Duration::from_millis(300), "lookup took {elapsed:?}");
        assert!(manager.statistics().store_failures >= 1);
        writer.join().unwrap();
    }
}
