//! Get-or-compute over the memory tier and persistent store.
//!
//! Lookup order is memory, then persistent (fresh records only), then the
//! caller's compute function. Any failure in the first two steps is logged and
//! treated as a miss. Errors from the compute function are returned unchanged.
//!
//! Concurrent calls for the same key may both miss and both compute; there is
//! no per-key lock.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use kelp_core::{
    env_bool, env_parse, env_secs, quality_score, CacheKey, CacheMode, CacheRecord, CacheType,
    ConfigError, FeatureKind, KelpResult, QualityWeights, RetentionPriority, RetentionTiers,
    StorageError, Timestamp, TtlConfig,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::cache::codec;
use crate::cache::{CacheRead, MemoryTier, PersistentStore, ReadSource, StoreStats};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the retention manager.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Memory tier capacity for each cache type (default: 1000)
    pub memory_capacity_per_type: usize,
    /// Freshness window per cache type
    pub ttl: TtlConfig,
    /// Default retention length per priority
    pub retention_tiers: RetentionTiers,
    /// Quality multipliers per cache type
    pub quality_weights: QualityWeights,
    /// Upper bound on any single persistent-store call (default: 2s)
    pub store_timeout: Duration,
    /// Consecutive store failures before the store is skipped (default: 5)
    pub failure_threshold: u32,
    /// How long the store is skipped once the threshold trips (default: 30s)
    pub retry_after: Duration,
    /// Start in read-only (memory only) mode
    pub read_only: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_capacity_per_type: 1000,
            ttl: TtlConfig::default(),
            retention_tiers: RetentionTiers::default(),
            quality_weights: QualityWeights::default(),
            store_timeout: Duration::from_secs(2),
            failure_threshold: 5,
            retry_after: Duration::from_secs(30),
            read_only: false,
        }
    }
}

impl CacheConfig {
    /// Create CacheConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `KELP_CACHE_MEMORY_CAPACITY`: entries per cache type (default: 1000)
    /// - `KELP_CACHE_STORE_TIMEOUT_MS`: store call timeout (default: 2000)
    /// - `KELP_CACHE_FAILURE_THRESHOLD`: failures before skipping the store (default: 5)
    /// - `KELP_CACHE_RETRY_AFTER_SECS`: store skip duration (default: 30)
    /// - `KELP_CACHE_READ_ONLY`: start in read-only mode (default: false)
    /// - `KELP_TTL_*_SECS`: see [`TtlConfig::from_env`]
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            memory_capacity_per_type: env_parse(
                "KELP_CACHE_MEMORY_CAPACITY",
                d.memory_capacity_per_type,
            ),
            ttl: TtlConfig::from_env(),
            retention_tiers: d.retention_tiers,
            quality_weights: d.quality_weights,
            store_timeout: Duration::from_millis(env_parse(
                "KELP_CACHE_STORE_TIMEOUT_MS",
                d.store_timeout.as_millis() as u64,
            )),
            failure_threshold: env_parse("KELP_CACHE_FAILURE_THRESHOLD", d.failure_threshold),
            retry_after: env_secs("KELP_CACHE_RETRY_AFTER_SECS", d.retry_after),
            read_only: env_bool("KELP_CACHE_READ_ONLY", d.read_only),
        }
    }

    pub fn with_memory_capacity(mut self, capacity: usize) -> Self {
        self.memory_capacity_per_type = capacity;
        self
    }

    pub fn with_ttl(mut self, ttl: TtlConfig) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn with_circuit(mut self, failure_threshold: u32, retry_after: Duration) -> Self {
        self.failure_threshold = failure_threshold;
        self.retry_after = retry_after;
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory_capacity_per_type == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.memory_capacity_per_type".to_string(),
                value: "0".to_string(),
                reason: "memory tier needs room for at least one entry".to_string(),
            });
        }
        if self.store_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "cache.store_timeout".to_string(),
                value: "0".to_string(),
                reason: "store calls need a positive timeout".to_string(),
            });
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.failure_threshold".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        self.ttl.validate()?;
        self.retention_tiers.validate()?;
        self.quality_weights.validate()
    }
}

// ============================================================================
// REQUEST
// ============================================================================

/// Logical identity of an artifact plus how to store it.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRequest {
    pub cache_type: CacheType,
    pub logical_id: String,
    pub params: Value,
    /// Overrides the cache type's default TTL.
    pub ttl: Option<Duration>,
    pub feature_kind: Option<FeatureKind>,
    /// Stored on the record for policy custom filters.
    pub attributes: BTreeMap<String, Value>,
}

impl CacheRequest {
    pub fn new(cache_type: CacheType, logical_id: impl Into<String>) -> Self {
        Self {
            cache_type,
            logical_id: logical_id.into(),
            params: Value::Null,
            ttl: None,
            feature_kind: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_feature_kind(mut self, kind: FeatureKind) -> Self {
        self.feature_kind = Some(kind);
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn key(&self) -> CacheKey {
        CacheKey::derive(self.cache_type, &self.logical_id, &self.params)
    }

    /// Features of one feature family for a domain record.
    pub fn features(record_id: &str, kind: FeatureKind, params: Value) -> Self {
        Self::new(CacheType::Feature, record_id)
            .with_params(json!({"feature_kind": kind.as_str(), "params": params}))
            .with_feature_kind(kind)
            .with_attribute("feature_kind", json!(kind.as_str()))
    }

    /// A model's prediction for one input.
    pub fn prediction(model_id: &str, input: Value) -> Self {
        Self::new(CacheType::Inference, model_id).with_params(input)
    }

    /// A prepared training set for a model type and data version.
    pub fn training(model_type: &str, data_version: &str, params: Value) -> Self {
        Self::new(CacheType::Training, model_type)
            .with_params(json!({"data_version": data_version, "params": params}))
            .with_attribute("data_version", json!(data_version))
    }

    /// A series aggregated over a named time window.
    pub fn aggregation(series_id: &str, time_window: &str, params: Value) -> Self {
        Self::new(CacheType::AggregatedSeries, series_id)
            .with_params(json!({"time_window": time_window, "params": params}))
            .with_attribute("time_window", json!(time_window))
    }
}

// ============================================================================
// STATISTICS
// ============================================================================

#[derive(Debug, Default)]
struct CacheCounters {
    memory_hits: AtomicU64,
    persistent_hits: AtomicU64,
    misses: AtomicU64,
    computed: AtomicU64,
    store_failures: AtomicU64,
    store_skips: AtomicU64,
    lookup_micros: AtomicU64,
    lookups: AtomicU64,
}

/// Snapshot exposed by the statistics query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStatistics {
    pub hits: u64,
    pub memory_hits: u64,
    pub persistent_hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
    pub computed: u64,
    pub memory_entries: usize,
    pub memory_evictions: u64,
    pub store_failures: u64,
    /// Lookups that bypassed an unhealthy store.
    pub store_skips: u64,
    pub avg_lookup_ms: f64,
    pub mode: CacheMode,
    /// True while the persistent store is being skipped after repeated failures.
    pub degraded: bool,
}

/// Skips the persistent store for a while after repeated failures.
#[derive(Debug, Default)]
struct StoreCircuit {
    consecutive_failures: AtomicU32,
    open_until: Mutex<Option<Instant>>,
}

impl StoreCircuit {
    fn allows(&self) -> bool {
        match self.open_until.lock() {
            Ok(mut guard) => match *guard {
                Some(until) if Instant::now() < until => false,
                Some(_) => {
                    *guard = None;
                    true
                }
                None => true,
            },
            Err(_) => true,
        }
    }

    fn is_open(&self) -> bool {
        self.open_until
            .lock()
            .map(|g| g.is_some_and(|until| Instant::now() < until))
            .unwrap_or(false)
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    /// Returns true when this failure opened the circuit.
    fn record_failure(&self, threshold: u32, retry_after: Duration) -> bool {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures < threshold {
            return false;
        }
        self.consecutive_failures.store(0, Ordering::Relaxed);
        if let Ok(mut guard) = self.open_until.lock() {
            *guard = Some(Instant::now() + retry_after);
        }
        true
    }
}

// ============================================================================
// RETENTION MANAGER
// ============================================================================

/// Owns record creation for every cache type.
pub struct RetentionManager {
    store: Arc<dyn PersistentStore>,
    memory: Arc<MemoryTier>,
    config: CacheConfig,
    read_only: AtomicBool,
    counters: CacheCounters,
    circuit: StoreCircuit,
}

impl RetentionManager {
    pub fn new(store: Arc<dyn PersistentStore>, config: CacheConfig) -> Self {
        let memory = Arc::new(MemoryTier::new(config.memory_capacity_per_type));
        Self {
            store,
            memory,
            read_only: AtomicBool::new(config.read_only),
            config,
            counters: CacheCounters::default(),
            circuit: StoreCircuit::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The memory tier, shared with the policy engine for eviction.
    pub fn memory_tier(&self) -> Arc<MemoryTier> {
        Arc::clone(&self.memory)
    }

    pub fn store(&self) -> Arc<dyn PersistentStore> {
        Arc::clone(&self.store)
    }

    pub fn mode(&self) -> CacheMode {
        if self.read_only.load(Ordering::SeqCst) {
            CacheMode::ReadOnly
        } else {
            CacheMode::Normal
        }
    }

    pub fn set_mode(&self, mode: CacheMode) {
        let read_only = mode == CacheMode::ReadOnly;
        if self.read_only.swap(read_only, Ordering::SeqCst) != read_only {
            tracing::info!(mode = %mode, "Cache mode changed");
        }
    }

    /// Return the cached value for `request`, computing and caching it on a miss.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        request: CacheRequest,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce(String, Value) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        self.fetch_or_compute(request, compute)
            .await
            .map(CacheRead::into_value)
    }

    /// Like [`get_or_compute`](Self::get_or_compute) but reports which tier answered.
    pub async fn fetch_or_compute<T, E, F, Fut>(
        &self,
        request: CacheRequest,
        compute: F,
    ) -> Result<CacheRead<T>, E>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce(String, Value) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        let started = Instant::now();
        let key = request.key();
        let now = Utc::now();

        if let Some(value) = self.read_memory::<T>(&request, &key, now) {
            self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
            self.record_lookup(started);
            return Ok(CacheRead::new(value, key, ReadSource::Memory));
        }

        if let Some(value) = self.read_persistent::<T>(&request, &key, now).await {
            self.counters.persistent_hits.fetch_add(1, Ordering::Relaxed);
            self.record_lookup(started);
            return Ok(CacheRead::new(value, key, ReadSource::Persistent));
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        self.record_lookup(started);

        let value = compute(request.logical_id.clone(), request.params.clone()).await?;
        self.counters.computed.fetch_add(1, Ordering::Relaxed);
        self.write_computed(&request, &key, &value).await;
        Ok(CacheRead::new(value, key, ReadSource::Computed))
    }

    // ------------------------------------------------------------------------
    // Typed entry points
    // ------------------------------------------------------------------------

    /// Features of one feature family for a domain record.
    pub async fn get_or_compute_features<T, E, F, Fut>(
        &self,
        record_id: &str,
        kind: FeatureKind,
        params: Value,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce(String, Value) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        self.get_or_compute(CacheRequest::features(record_id, kind, params), compute)
            .await
    }

    /// A model's prediction for one input.
    pub async fn get_or_compute_prediction<T, E, F, Fut>(
        &self,
        model_id: &str,
        input: Value,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce(String, Value) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        self.get_or_compute(CacheRequest::prediction(model_id, input), compute)
            .await
    }

    /// A prepared training set for a model type and data version.
    pub async fn get_or_prepare_training<T, E, F, Fut>(
        &self,
        model_type: &str,
        data_version: &str,
        params: Value,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce(String, Value) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        let request = CacheRequest::training(model_type, data_version, params);
        self.get_or_compute(request, compute).await
    }

    /// A series aggregated over a named time window.
    pub async fn get_or_aggregate<T, E, F, Fut>(
        &self,
        series_id: &str,
        time_window: &str,
        params: Value,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce(String, Value) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        let request = CacheRequest::aggregation(series_id, time_window, params);
        self.get_or_compute(request, compute).await
    }

    // ------------------------------------------------------------------------
    // Coherency
    // ------------------------------------------------------------------------

    /// Drop keys from the memory tier after the persistent copy changed.
    pub fn evict_from_memory(&self, cache_type: CacheType, keys: &[CacheKey]) -> u64 {
        match self.memory.remove(cache_type, keys) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, cache_type = %cache_type, "Memory eviction failed");
                0
            }
        }
    }

    /// Remove one entry from both tiers.
    pub async fn invalidate(&self, cache_type: CacheType, key: &CacheKey) -> KelpResult<()> {
        self.memory.remove(cache_type, std::slice::from_ref(key))?;
        if self.mode() == CacheMode::ReadOnly {
            return Ok(());
        }
        let outcome = tokio::time::timeout(
            self.config.store_timeout,
            self.store.apply_batch(
                cache_type,
                std::slice::from_ref(key),
                crate::cache::BatchAction::Delete,
            ),
        )
        .await
        .map_err(|_| StorageError::Timeout {
            operation: "invalidate",
            elapsed: self.config.store_timeout,
        })??;
        tracing::debug!(cache_key = %key, affected = outcome.affected, "Cache entry invalidated");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Statistics
    // ------------------------------------------------------------------------

    pub fn statistics(&self) -> CacheStatistics {
        let memory_hits = self.counters.memory_hits.load(Ordering::Relaxed);
        let persistent_hits = self.counters.persistent_hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let hits = memory_hits + persistent_hits;
        let total = hits + misses;
        let lookups = self.counters.lookups.load(Ordering::Relaxed);
        let micros = self.counters.lookup_micros.load(Ordering::Relaxed);
        CacheStatistics {
            hits,
            memory_hits,
            persistent_hits,
            misses,
            hit_ratio: if total == 0 { 0.0 } else { hits as f64 / total as f64 },
            computed: self.counters.computed.load(Ordering::Relaxed),
            memory_entries: self.memory.total_len(),
            memory_evictions: self.memory.evictions(),
            store_failures: self.counters.store_failures.load(Ordering::Relaxed),
            store_skips: self.counters.store_skips.load(Ordering::Relaxed),
            avg_lookup_ms: if lookups == 0 {
                0.0
            } else {
                micros as f64 / lookups as f64 / 1000.0
            },
            mode: self.mode(),
            degraded: self.circuit.is_open(),
        }
    }

    /// Occupancy of the persistent store, bounded by the store timeout.
    pub async fn store_stats(&self) -> KelpResult<StoreStats> {
        tokio::time::timeout(self.config.store_timeout, self.store.stats())
            .await
            .map_err(|_| StorageError::Timeout {
                operation: "stats",
                elapsed: self.config.store_timeout,
            })?
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn record_lookup(&self, started: Instant) {
        self.counters
            .lookup_micros
            .fetch_add(started.elapsed().as_micros() as u64, Ordering::Relaxed);
        self.counters.lookups.fetch_add(1, Ordering::Relaxed);
    }

    fn persistent_enabled(&self) -> bool {
        if self.mode() == CacheMode::ReadOnly {
            return false;
        }
        if !self.circuit.allows() {
            self.counters.store_skips.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        true
    }

    fn store_failed(&self, operation: &'static str, error: &dyn std::fmt::Display) {
        self.counters.store_failures.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(operation, error = %error, "Persistent store call failed, continuing without it");
        if self
            .circuit
            .record_failure(self.config.failure_threshold, self.config.retry_after)
        {
            tracing::warn!(
                retry_after_secs = self.config.retry_after.as_secs(),
                "Persistent store skipped after repeated failures"
            );
        }
    }

    /// Run a store call under the configured timeout, feeding the circuit.
    async fn guarded<R>(
        &self,
        operation: &'static str,
        call: impl Future<Output = KelpResult<R>>,
    ) -> Option<R> {
        match tokio::time::timeout(self.config.store_timeout, call).await {
            Ok(Ok(result)) => {
                self.circuit.record_success();
                Some(result)
            }
            Ok(Err(e)) => {
                self.store_failed(operation, &e);
                None
            }
            Err(_) => {
                let e = StorageError::Timeout {
                    operation,
                    elapsed: self.config.store_timeout,
                };
                self.store_failed(operation, &e);
                None
            }
        }
    }

    fn read_memory<T: DeserializeOwned>(
        &self,
        request: &CacheRequest,
        key: &CacheKey,
        now: Timestamp,
    ) -> Option<T> {
        match self.memory.get(request.cache_type, key, now) {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(typed) => Some(typed),
                Err(e) => {
                    tracing::warn!(cache_key = %key, error = %e, "Memory entry has unexpected shape");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(cache_key = %key, error = %e, "Memory tier read failed");
                None
            }
        }
    }

    async fn read_persistent<T: DeserializeOwned>(
        &self,
        request: &CacheRequest,
        key: &CacheKey,
        now: Timestamp,
    ) -> Option<T> {
        if !self.persistent_enabled() {
            return None;
        }
        let record = self
            .guarded("get", self.store.get(request.cache_type, key))
            .await??;
        if !record.is_fresh(now) {
            tracing::debug!(cache_key = %key, "Persistent record is stale");
            return None;
        }
        let value = match codec::decode_payload(&record.payload) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(cache_key = %key, error = %e, "Persistent payload could not be decoded");
                return None;
            }
        };
        let typed: T = match serde_json::from_value(value.clone()) {
            Ok(typed) => typed,
            Err(e) => {
                tracing::warn!(cache_key = %key, error = %e, "Persistent payload has unexpected shape");
                return None;
            }
        };

        self.guarded("touch", self.store.touch(request.cache_type, key, now))
            .await;
        if let Err(e) = self
            .memory
            .insert(request.cache_type, key.clone(), value, record.expires_at)
        {
            tracing::warn!(cache_key = %key, error = %e, "Memory tier write failed");
        }
        Some(typed)
    }

    async fn write_computed<T: Serialize>(&self, request: &CacheRequest, key: &CacheKey, value: &T) {
        let json_value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(cache_key = %key, error = %e, "Computed value is not serializable, not caching");
                return;
            }
        };

        let now = Utc::now();
        let ttl = request
            .ttl
            .unwrap_or_else(|| self.config.ttl.for_type(request.cache_type));
        let quality = quality_score(
            &json_value,
            request.cache_type,
            request.feature_kind,
            &self.config.quality_weights,
        );
        let retention_days = self
            .config
            .retention_tiers
            .days_for(RetentionPriority::from_quality_score(quality));
        let record = CacheRecord::new(
            key.clone(),
            request.cache_type,
            request.logical_id.clone(),
            json_value.clone(),
            quality,
            retention_days,
            ttl,
            now,
        )
        .with_feature_kind(request.feature_kind)
        .with_attributes(request.attributes.clone());

        if let Err(e) =
            self.memory
                .insert(request.cache_type, key.clone(), json_value, record.expires_at)
        {
            tracing::warn!(cache_key = %key, error = %e, "Memory tier write failed");
        }

        if self.persistent_enabled() && self.guarded("put", self.store.put(&record)).await.is_some() {
            tracing::debug!(
                cache_key = %key,
                cache_type = %request.cache_type,
                quality,
                priority = %record.priority,
                "Cached computed artifact"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryRecordStore;
    use std::sync::atomic::AtomicUsize;

    fn manager(store: Arc<InMemoryRecordStore>) -> RetentionManager {
        RetentionManager::new(store, CacheConfig::default())
    }

    async fn compute_counted(
        counter: &AtomicUsize,
        id: String,
        params: Value,
    ) -> Result<Value, String> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(json!({"id": id, "params": params, "score": 0.7}))
    }

    #[tokio::test]
    async fn test_second_call_is_memory_hit() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mgr = manager(store);
        let calls = AtomicUsize::new(0);
        let request = CacheRequest::new(CacheType::Inference, "model-a").with_params(json!({"x": 1}));

        let first = mgr
            .fetch_or_compute(request.clone(), |id, p| compute_counted(&calls, id, p))
            .await
            .unwrap();
        let second = mgr
            .fetch_or_compute(request, |id, p| compute_counted(&calls, id, p))
            .await
            .unwrap();

        assert_eq!(first.source(), ReadSource::Computed);
        assert_eq!(second.source(), ReadSource::Memory);
        assert_eq!(first.value(), second.value());
        assert_eq!(first.cache_key(), second.cache_key());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = mgr.statistics();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_ratio - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_persistent_hit_after_memory_loss() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mgr = manager(Arc::clone(&store));
        let calls = AtomicUsize::new(0);
        let request = CacheRequest::new(CacheType::Training, "rf").with_params(json!({"v": 3}));

        mgr.get_or_compute(request.clone(), |id, p| compute_counted(&calls, id, p))
            .await
            .unwrap();
        mgr.memory_tier().clear().unwrap();

        let read = mgr
            .fetch_or_compute(request.clone(), |id, p| compute_counted(&calls, id, p))
            .await
            .unwrap();
        assert_eq!(read.source(), ReadSource::Persistent);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stored = store.get(CacheType::Training, &request.key()).await.unwrap().unwrap();
        assert_eq!(stored.access_count, 2);
    }

    #[tokio::test]
    async fn test_compute_error_propagates_unchanged() {
        let mgr = manager(Arc::new(InMemoryRecordStore::new()));
        let request = CacheRequest::new(CacheType::Inference, "broken");
        let result: Result<Value, String> = mgr
            .get_or_compute(request, |_, _| async { Err("model exploded".to_string()) })
            .await;
        assert_eq!(result.unwrap_err(), "model exploded");
        assert_eq!(mgr.statistics().computed, 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_still_returns_value() {
        let store = Arc::new(InMemoryRecordStore::new());
        store.set_available(false);
        let mgr = manager(Arc::clone(&store));
        let calls = AtomicUsize::new(0);
        let request = CacheRequest::new(CacheType::Feature, "rec-9");

        let value: Value = mgr
            .get_or_compute(request.clone(), |id, p| compute_counted(&calls, id, p))
            .await
            .unwrap();
        assert_eq!(value["id"], "rec-9");
        assert!(mgr.statistics().store_failures >= 1);

        // Memory tier still serves the value.
        let again = mgr
            .fetch_or_compute(request, |id, p| compute_counted(&calls, id, p))
            .await
            .unwrap();
        assert_eq!(again.source(), ReadSource::Memory);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_store_times_out_as_miss() {
        let store = Arc::new(InMemoryRecordStore::new());
        store.set_latency(Duration::from_millis(200));
        let mgr = RetentionManager::new(
            store,
            CacheConfig::default().with_store_timeout(Duration::from_millis(20)),
        );
        let calls = AtomicUsize::new(0);
        let value: Value = mgr
            .get_or_compute(CacheRequest::new(CacheType::Inference, "m"), |id, p| {
                compute_counted(&calls, id, p)
            })
            .await
            .unwrap();
        assert_eq!(value["id"], "m");
        assert!(mgr.statistics().store_failures >= 1);
    }

    #[tokio::test]
    async fn test_circuit_skips_store_after_threshold() {
        let store = Arc::new(InMemoryRecordStore::new());
        store.set_available(false);
        let mgr = RetentionManager::new(
            Arc::clone(&store) as Arc<dyn PersistentStore>,
            CacheConfig::default().with_circuit(2, Duration::from_secs(60)),
        );
        let calls = AtomicUsize::new(0);
        for i in 0..4 {
            let request = CacheRequest::new(CacheType::Inference, format!("m{i}"));
            let _: Value = mgr
                .get_or_compute(request, |id, p| compute_counted(&calls, id, p))
                .await
                .unwrap();
        }
        let stats = mgr.statistics();
        assert!(stats.degraded);
        assert!(stats.store_skips > 0);
        assert_eq!(stats.store_failures, 2);
    }

    #[tokio::test]
    async fn test_read_only_mode_never_touches_store() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mgr = RetentionManager::new(
            Arc::clone(&store) as Arc<dyn PersistentStore>,
            CacheConfig::default().read_only(true),
        );
        let calls = AtomicUsize::new(0);
        let _: Value = mgr
            .get_or_compute(CacheRequest::new(CacheType::Inference, "edge"), |id, p| {
                compute_counted(&calls, id, p)
            })
            .await
            .unwrap();
        assert_eq!(store.operations(), 0);
        assert_eq!(mgr.statistics().mode, CacheMode::ReadOnly);
        assert_eq!(mgr.statistics().memory_entries, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_recomputed() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mgr = manager(store);
        let calls = AtomicUsize::new(0);
        let request = CacheRequest::new(CacheType::Inference, "short")
            .with_ttl(Duration::from_millis(30));

        let _: Value = mgr
            .get_or_compute(request.clone(), |id, p| compute_counted(&calls, id, p))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        let read = mgr
            .fetch_or_compute(request, |id, p| compute_counted(&calls, id, p))
            .await
            .unwrap();
        assert_eq!(read.source(), ReadSource::Computed);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_record_carries_quality_and_attributes() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mgr = manager(Arc::clone(&store));
        let value: Value = mgr
            .get_or_aggregate("grid_-12_13", "seasonal", json!({}), |_, _| async {
                Ok::<_, String>(json!({"mean": 21.3, "count": 40}))
            })
            .await
            .unwrap();
        assert_eq!(value["count"], 40);

        let key = CacheRequest::new(CacheType::AggregatedSeries, "grid_-12_13")
            .with_params(json!({"time_window": "seasonal", "params": {}}))
            .key();
        let record = store.get(CacheType::AggregatedSeries, &key).await.unwrap().unwrap();
        assert_eq!(record.attributes["time_window"], "seasonal");
        assert_eq!(record.priority, RetentionPriority::Critical);
        assert_eq!(record.retention_days, 730);
    }

    #[tokio::test]
    async fn test_invalidate_removes_both_tiers() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mgr = manager(Arc::clone(&store));
        let calls = AtomicUsize::new(0);
        let request = CacheRequest::new(CacheType::Feature, "r");
        let _: Value = mgr
            .get_or_compute(request.clone(), |id, p| compute_counted(&calls, id, p))
            .await
            .unwrap();
        mgr.invalidate(CacheType::Feature, &request.key()).await.unwrap();
        assert_eq!(store.count(CacheType::Feature).await.unwrap(), 0);
        assert_eq!(mgr.statistics().memory_entries, 0);
    }
}
