//! Retention policy engine.
//!
//! Each run counts the policy's matches first. A run matching more than the
//! safety cap is refused outright and logged as a failed execution; nothing is
//! touched. Otherwise the matches are acted on in fixed-size batches with a
//! short pause between them. Every batch is atomic in the store, so a run that
//! stops early (store failure, shutdown) never leaves a record half-written.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use kelp_core::{
    CacheKey, CacheType, KelpError, KelpResult, PolicyAction, PolicyError,
    PolicyExecutionRecord, PolicyUpdate, RetentionPolicy, StorageError, Timestamp,
    ValidationError,
};
use kelp_storage::{BatchAction, MatchedRecord, MemoryTier, PersistentStore, RetentionManager};
use tokio::sync::watch;

use crate::config::PolicyEngineConfig;
use crate::defaults::default_policies;
use crate::report::{
    CleanupReport, PolicyMetricsSnapshot, PolicyStatus, PolicySummary, TypeCleanup,
};

// ============================================================================
// METRICS
// ============================================================================

#[derive(Debug, Default)]
struct PolicyMetrics {
    runs: AtomicU64,
    runs_failed: AtomicU64,
    safety_breaches: AtomicU64,
    overlaps_skipped: AtomicU64,
    records_affected: AtomicU64,
    bytes_freed: AtomicU64,
    last_cleanup: RwLock<Option<Timestamp>>,
}

impl PolicyMetrics {
    fn snapshot(&self) -> PolicyMetricsSnapshot {
        PolicyMetricsSnapshot {
            runs: self.runs.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            safety_breaches: self.safety_breaches.load(Ordering::Relaxed),
            overlaps_skipped: self.overlaps_skipped.load(Ordering::Relaxed),
            records_affected: self.records_affected.load(Ordering::Relaxed),
            bytes_freed: self.bytes_freed.load(Ordering::Relaxed),
            last_cleanup: self.last_cleanup.read().ok().and_then(|t| *t),
        }
    }
}

/// How a run ended, beyond what the execution record says.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunEnd {
    Completed,
    SafetyBreach,
    StoreFailure,
    Interrupted,
}

/// Result of one scheduling pass.
#[derive(Debug, Clone, Default)]
pub struct PassOutcome {
    pub executions: Vec<PolicyExecutionRecord>,
    /// Runs aborted by store errors; those policies stay due.
    pub store_failures: usize,
}

/// Removes a policy from the running set when the run ends.
struct RunGuard<'a> {
    running: &'a Mutex<HashSet<String>>,
    policy_id: String,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut running) = self.running.lock() {
            running.remove(&self.policy_id);
        }
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// Owns the registered policies and applies them to the persistent store.
pub struct RetentionPolicyEngine {
    store: Arc<dyn PersistentStore>,
    memory: Option<Arc<MemoryTier>>,
    config: PolicyEngineConfig,
    policies: RwLock<Vec<RetentionPolicy>>,
    running: Mutex<HashSet<String>>,
    history: RwLock<VecDeque<PolicyExecutionRecord>>,
    metrics: PolicyMetrics,
    scheduler_running: AtomicBool,
}

impl std::fmt::Debug for RetentionPolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionPolicyEngine")
            .field("config", &self.config)
            .field("policies", &self.policy_ids())
            .field("scheduler_running", &self.is_scheduler_running())
            .finish()
    }
}

impl RetentionPolicyEngine {
    /// An invalid `batch_size` of 0 is run as 1.
    pub fn new(store: Arc<dyn PersistentStore>, config: PolicyEngineConfig) -> Self {
        if let Err(e) = config.validate() {
            tracing::warn!(error = %e, "Policy engine config is invalid");
        }
        let policies = if config.load_defaults {
            default_policies()
        } else {
            Vec::new()
        };
        Self {
            store,
            memory: None,
            config,
            policies: RwLock::new(policies),
            running: Mutex::new(HashSet::new()),
            history: RwLock::new(VecDeque::new()),
            metrics: PolicyMetrics::default(),
            scheduler_running: AtomicBool::new(false),
        }
    }

    /// Engine over the manager's store that also evicts acted-on keys from
    /// the manager's memory tier.
    pub fn for_manager(manager: &RetentionManager, config: PolicyEngineConfig) -> Self {
        Self::new(manager.store(), config).with_memory_tier(manager.memory_tier())
    }

    pub fn with_memory_tier(mut self, memory: Arc<MemoryTier>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn config(&self) -> &PolicyEngineConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Policy CRUD
    // ------------------------------------------------------------------------

    pub fn add_policy(&self, policy: RetentionPolicy) -> KelpResult<()> {
        policy.validate()?;
        let mut policies = self.policies.write().map_err(|_| StorageError::LockPoisoned)?;
        if policies.iter().any(|p| p.policy_id == policy.policy_id) {
            return Err(ValidationError::DuplicateId {
                id: policy.policy_id,
            }
            .into());
        }
        tracing::info!(
            policy_id = %policy.policy_id,
            cache_type = %policy.cache_type,
            action = %policy.action,
            "Policy added"
        );
        policies.push(policy);
        Ok(())
    }

    pub fn remove_policy(&self, policy_id: &str) -> KelpResult<RetentionPolicy> {
        let mut policies = self.policies.write().map_err(|_| StorageError::LockPoisoned)?;
        let idx = policies
            .iter()
            .position(|p| p.policy_id == policy_id)
            .ok_or_else(|| not_found(policy_id))?;
        tracing::info!(policy_id = %policy_id, "Policy removed");
        Ok(policies.remove(idx))
    }

    /// Apply a partial update; the stored policy is unchanged if the result is invalid.
    pub fn update_policy(
        &self,
        policy_id: &str,
        update: &PolicyUpdate,
    ) -> KelpResult<RetentionPolicy> {
        let mut policies = self.policies.write().map_err(|_| StorageError::LockPoisoned)?;
        let slot = policies
            .iter_mut()
            .find(|p| p.policy_id == policy_id)
            .ok_or_else(|| not_found(policy_id))?;
        let next = update.apply_to(slot)?;
        *slot = next.clone();
        tracing::info!(policy_id = %policy_id, enabled = next.enabled, "Policy updated");
        Ok(next)
    }

    pub fn get_policy(&self, policy_id: &str) -> Option<RetentionPolicy> {
        self.policies
            .read()
            .ok()?
            .iter()
            .find(|p| p.policy_id == policy_id)
            .cloned()
    }

    /// Registered policies in registration order.
    pub fn policies(&self) -> Vec<RetentionPolicy> {
        self.policies.read().map(|p| p.clone()).unwrap_or_default()
    }

    fn policy_ids(&self) -> Vec<String> {
        self.policies()
            .into_iter()
            .map(|p| p.policy_id)
            .collect()
    }

    /// Register any default policy whose id is not taken. Returns how many were added.
    pub fn load_default_policies(&self) -> KelpResult<usize> {
        let mut added = 0;
        for policy in default_policies() {
            match self.add_policy(policy) {
                Ok(()) => added += 1,
                Err(KelpError::Validation(ValidationError::DuplicateId { .. })) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(added)
    }

    // ------------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------------

    /// Run every enabled, due policy in registration order and reschedule it.
    pub async fn execute_due(&self, dry_run: bool) -> PassOutcome {
        self.execute_due_inner(dry_run, None).await
    }

    pub(crate) async fn execute_due_inner(
        &self,
        dry_run: bool,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> PassOutcome {
        let now = Utc::now();
        let due: Vec<RetentionPolicy> = self
            .policies()
            .into_iter()
            .filter(|p| p.is_due(now))
            .collect();

        let mut outcome = PassOutcome::default();
        for policy in due {
            if shutdown.is_some_and(|rx| *rx.borrow()) {
                break;
            }
            let Some((record, end)) = self.run_policy(&policy, dry_run, shutdown).await else {
                continue;
            };
            if end == RunEnd::StoreFailure {
                outcome.store_failures += 1;
            } else {
                self.reschedule(&policy.policy_id);
            }
            outcome.executions.push(record);
        }
        outcome
    }

    /// Run one policy now, whether or not it is due. The schedule is left alone.
    ///
    /// Returns `Ok(None)` when the policy is already running.
    pub async fn execute_policy(
        &self,
        policy_id: &str,
        dry_run: bool,
    ) -> KelpResult<Option<PolicyExecutionRecord>> {
        let policy = self.get_policy(policy_id).ok_or_else(|| not_found(policy_id))?;
        Ok(self
            .run_policy(&policy, dry_run, None)
            .await
            .map(|(record, _)| record))
    }

    /// Schedule the next run from the interval the policy has now, which an
    /// update during the run may have changed.
    fn reschedule(&self, policy_id: &str) {
        if let Ok(mut policies) = self.policies.write() {
            if let Some(p) = policies.iter_mut().find(|p| p.policy_id == policy_id) {
                p.next_execution = Some(Utc::now() + p.execution_interval());
            }
        }
    }

    async fn run_policy(
        &self,
        policy: &RetentionPolicy,
        dry_run: bool,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> Option<(PolicyExecutionRecord, RunEnd)> {
        let _guard = match self.enter(&policy.policy_id) {
            Some(guard) => guard,
            None => {
                self.metrics.overlaps_skipped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(policy_id = %policy.policy_id, "Policy already running, skipped");
                return None;
            }
        };

        let started = Instant::now();
        let now = Utc::now();
        let record = PolicyExecutionRecord::started(&policy.policy_id, now, dry_run);
        tracing::info!(policy_id = %policy.policy_id, dry_run, "Executing policy");

        let (mut record, end) = self.apply(policy, record, now, dry_run, shutdown).await;
        record.duration_ms = started.elapsed().as_millis() as u64;
        self.finish(&record, end);
        Some((record, end))
    }

    fn enter(&self, policy_id: &str) -> Option<RunGuard<'_>> {
        let mut running = self.running.lock().ok()?;
        if !running.insert(policy_id.to_string()) {
            return None;
        }
        Some(RunGuard {
            running: &self.running,
            policy_id: policy_id.to_string(),
        })
    }

    async fn apply(
        &self,
        policy: &RetentionPolicy,
        mut record: PolicyExecutionRecord,
        now: Timestamp,
        dry_run: bool,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> (PolicyExecutionRecord, RunEnd) {
        let predicate = policy.predicate(now);
        let matched: Vec<MatchedRecord> =
            match self.timed("find_matching", self.store.find_matching(&predicate)).await {
                Ok(m) => m,
                Err(e) => return (self.store_failure(policy, record, e), RunEnd::StoreFailure),
            };
        record.records_matched = matched.len() as u64;

        let cap = match self.effective_cap(policy.cache_type).await {
            Ok(cap) => cap,
            Err(e) => return (self.store_failure(policy, record, e), RunEnd::StoreFailure),
        };
        if record.records_matched > cap {
            let breach = PolicyError::SafetyBreach {
                policy_id: policy.policy_id.clone(),
                matched: record.records_matched,
                cap,
            };
            tracing::error!(
                policy_id = %policy.policy_id,
                matched = record.records_matched,
                cap,
                "Safety cap exceeded, run refused"
            );
            return (record.fail(breach), RunEnd::SafetyBreach);
        }

        if dry_run || matched.is_empty() {
            record.space_freed_estimate_bytes = matched.iter().map(|m| m.size_bytes).sum();
            return (record, RunEnd::Completed);
        }

        let action = match self.batch_action(policy) {
            Ok(action) => action,
            Err(e) => return (record.fail(e), RunEnd::Completed),
        };
        let keys: Vec<CacheKey> = matched.into_iter().map(|m| m.cache_key).collect();

        for (i, batch) in keys.chunks(self.config.batch_size.max(1)).enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.batch_pause).await;
                if shutdown.is_some_and(|rx| *rx.borrow()) {
                    let reason = PolicyError::Aborted {
                        policy_id: policy.policy_id.clone(),
                        reason: "interrupted by shutdown".to_string(),
                    };
                    tracing::warn!(
                        policy_id = %policy.policy_id,
                        affected = record.records_affected,
                        "Policy run interrupted between batches"
                    );
                    return (record.fail(reason), RunEnd::Interrupted);
                }
            }

            let outcome = match self
                .timed(
                    "apply_batch",
                    self.store.apply_batch(policy.cache_type, batch, action),
                )
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => return (self.store_failure(policy, record, e), RunEnd::StoreFailure),
            };
            record.records_affected += outcome.affected;
            record.space_freed_estimate_bytes += outcome.bytes_freed;

            if !matches!(action, BatchAction::Compress { .. }) {
                self.evict(policy.cache_type, batch);
            }
            tracing::debug!(
                policy_id = %policy.policy_id,
                batch = i,
                affected = outcome.affected,
                "Batch applied"
            );
        }
        (record, RunEnd::Completed)
    }

    fn batch_action(&self, policy: &RetentionPolicy) -> Result<BatchAction, StorageError> {
        Ok(match policy.action {
            PolicyAction::Delete => BatchAction::Delete,
            PolicyAction::Archive => BatchAction::Archive,
            PolicyAction::Compress => BatchAction::Compress {
                level: self.config.compression_level,
            },
            PolicyAction::Migrate => {
                let to = policy
                    .migrate_to
                    .ok_or_else(|| StorageError::UnsupportedAction {
                        action: policy.action,
                        cache_type: policy.cache_type,
                        reason: "migrate_to is not set".to_string(),
                    })?;
                BatchAction::Migrate { to }
            }
        })
    }

    /// The absolute cap, tightened by the fractional cap when one is set.
    async fn effective_cap(&self, cache_type: CacheType) -> KelpResult<u64> {
        let Some(fraction) = self.config.safety_fraction else {
            return Ok(self.config.safety_cap);
        };
        let total = self.timed("count", self.store.count(cache_type)).await?;
        let fractional = (total as f64 * fraction).floor() as u64;
        Ok(self.config.safety_cap.min(fractional))
    }

    async fn timed<T>(
        &self,
        operation: &'static str,
        fut: impl std::future::Future<Output = KelpResult<T>>,
    ) -> KelpResult<T> {
        tokio::time::timeout(self.config.store_timeout, fut)
            .await
            .map_err(|_| StorageError::Timeout {
                operation,
                elapsed: self.config.store_timeout,
            })?
    }

    fn evict(&self, cache_type: CacheType, keys: &[CacheKey]) {
        if let Some(memory) = &self.memory {
            if let Err(e) = memory.remove(cache_type, keys) {
                tracing::warn!(error = %e, cache_type = %cache_type, "Memory eviction failed");
            }
        }
    }

    fn store_failure(
        &self,
        policy: &RetentionPolicy,
        record: PolicyExecutionRecord,
        error: KelpError,
    ) -> PolicyExecutionRecord {
        tracing::error!(
            policy_id = %policy.policy_id,
            affected = record.records_affected,
            error = %error,
            "Policy run aborted by store failure"
        );
        record.fail(PolicyError::Aborted {
            policy_id: policy.policy_id.clone(),
            reason: error.to_string(),
        })
    }

    fn finish(&self, record: &PolicyExecutionRecord, end: RunEnd) {
        self.metrics.runs.fetch_add(1, Ordering::Relaxed);
        if !record.success {
            self.metrics.runs_failed.fetch_add(1, Ordering::Relaxed);
        }
        if end == RunEnd::SafetyBreach {
            self.metrics.safety_breaches.fetch_add(1, Ordering::Relaxed);
        }
        if !record.dry_run {
            self.metrics
                .records_affected
                .fetch_add(record.records_affected, Ordering::Relaxed);
            self.metrics
                .bytes_freed
                .fetch_add(record.space_freed_estimate_bytes, Ordering::Relaxed);
            if record.records_affected > 0 {
                if let Ok(mut last) = self.metrics.last_cleanup.write() {
                    *last = Some(Utc::now());
                }
            }
        }

        if let Ok(mut history) = self.history.write() {
            history.push_back(record.clone());
            while history.len() > self.config.history_limit {
                history.pop_front();
            }
        }

        if record.success {
            tracing::info!(
                policy_id = %record.policy_id,
                matched = record.records_matched,
                affected = record.records_affected,
                bytes = record.space_freed_estimate_bytes,
                duration_ms = record.duration_ms,
                dry_run = record.dry_run,
                "Policy executed"
            );
        }
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Most recent execution records, oldest first.
    pub fn history(&self, limit: usize) -> Vec<PolicyExecutionRecord> {
        self.history
            .read()
            .map(|h| {
                let skip = h.len().saturating_sub(limit);
                h.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }

    pub fn metrics(&self) -> PolicyMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn is_scheduler_running(&self) -> bool {
        self.scheduler_running.load(Ordering::SeqCst)
    }

    pub(crate) fn set_scheduler_running(&self, running: bool) {
        self.scheduler_running.store(running, Ordering::SeqCst);
    }

    pub fn status(&self) -> PolicyStatus {
        let policies = self.policies();
        PolicyStatus {
            total_policies: policies.len(),
            enabled_policies: policies.iter().filter(|p| p.enabled).count(),
            scheduler_running: self.is_scheduler_running(),
            policies: policies.iter().map(PolicySummary::from).collect(),
            metrics: self.metrics(),
        }
    }

    /// Occupancy and cleanup totals per cache type.
    ///
    /// Live occupancy is zero when the store cannot be reached.
    pub async fn cleanup_report(&self) -> CleanupReport {
        let policies = self.policies();
        let history = self.history(usize::MAX);
        let stats = match self.timed("stats", self.store.stats()).await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!(error = %e, "Store statistics unavailable for cleanup report");
                Default::default()
            }
        };

        let mut per_type: BTreeMap<CacheType, TypeCleanup> = CacheType::ALL
            .iter()
            .map(|&ct| (ct, TypeCleanup::default()))
            .collect();
        for (ct, s) in &stats.per_type {
            let entry = per_type.entry(*ct).or_default();
            entry.live_records = s.records;
            entry.live_bytes = s.bytes;
        }
        let type_of: BTreeMap<&str, CacheType> = policies
            .iter()
            .map(|p| (p.policy_id.as_str(), p.cache_type))
            .collect();
        for p in &policies {
            per_type.entry(p.cache_type).or_default().policies += 1;
        }
        for run in history.iter().filter(|r| !r.dry_run) {
            if let Some(ct) = type_of.get(run.policy_id.as_str()) {
                let entry = per_type.entry(*ct).or_default();
                entry.records_cleaned += run.records_affected;
                entry.bytes_freed += run.space_freed_estimate_bytes;
            }
        }

        let metrics = self.metrics();
        let recent_start = history.len().saturating_sub(10);
        CleanupReport {
            generated_at: Utc::now(),
            total_policies: policies.len(),
            total_executions: history.len(),
            total_records_cleaned: metrics.records_affected,
            total_bytes_freed: metrics.bytes_freed,
            last_cleanup: metrics.last_cleanup,
            archived_records: stats.archived_records,
            per_type,
            recent_executions: history[recent_start..].to_vec(),
        }
    }

    /// Pause used by the scheduler after a store failure.
    pub(crate) fn error_backoff(&self) -> Duration {
        self.config.error_backoff
    }
}

fn not_found(policy_id: &str) -> KelpError {
    ValidationError::NotFound {
        kind: "policy",
        id: policy_id.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kelp_core::RetentionPriority;
    use kelp_storage::InMemoryRecordStore;
    use kelp_test_utils::fixtures::{aged_record, low_quality_feature_policy};

    fn engine() -> (Arc<InMemoryRecordStore>, RetentionPolicyEngine) {
        let store = Arc::new(InMemoryRecordStore::new());
        let engine = RetentionPolicyEngine::new(
            store.clone(),
            PolicyEngineConfig::default()
                .without_defaults()
                .with_batch_pause(Duration::ZERO),
        );
        (store, engine)
    }

    #[test]
    fn test_defaults_loaded_in_order() {
        let store = Arc::new(InMemoryRecordStore::new());
        let engine = RetentionPolicyEngine::new(store, PolicyEngineConfig::default());
        let ids = engine.policy_ids();
        assert_eq!(ids.len(), 8);
        assert_eq!(ids[0], "fs_high_quality");
        assert_eq!(engine.load_default_policies().unwrap(), 0);
    }

    #[test]
    fn test_crud() {
        let (_, engine) = engine();
        engine.add_policy(low_quality_feature_policy()).unwrap();
        assert!(engine.add_policy(low_quality_feature_policy()).is_err());

        let update = PolicyUpdate {
            enabled: Some(false),
            priority_threshold: Some(Some(RetentionPriority::Normal)),
            ..Default::default()
        };
        let updated = engine.update_policy("test_low_quality", &update).unwrap();
        assert!(!updated.enabled);
        assert_eq!(engine.status().enabled_policies, 0);

        let bad = PolicyUpdate {
            min_quality_score: Some(3.0),
            ..Default::default()
        };
        assert!(engine.update_policy("test_low_quality", &bad).is_err());
        assert_eq!(
            engine.get_policy("test_low_quality").unwrap().min_quality_score,
            0.3
        );

        engine.remove_policy("test_low_quality").unwrap();
        assert!(matches!(
            engine.remove_policy("test_low_quality"),
            Err(KelpError::Validation(ValidationError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let (store, engine) = engine();
        for i in 0..3 {
            let rec = aged_record(CacheType::Feature, &format!("old-{i}"), 0.1, 200, 0);
            store.put(&rec).await.unwrap();
        }
        engine.add_policy(low_quality_feature_policy()).unwrap();

        let record = engine
            .execute_policy("test_low_quality", true)
            .await
            .unwrap()
            .unwrap();
        assert!(record.success);
        assert!(record.dry_run);
        assert_eq!(record.records_matched, 3);
        assert_eq!(record.records_affected, 0);
        assert!(record.space_freed_estimate_bytes > 0);
        assert_eq!(store.count(CacheType::Feature).await.unwrap(), 3);
        assert!(engine.get_policy("test_low_quality").unwrap().next_execution.is_none());
    }

    #[tokio::test]
    async fn test_due_pass_reschedules() {
        let (store, engine) = engine();
        store
            .put(&aged_record(CacheType::Feature, "old", 0.1, 200, 0))
            .await
            .unwrap();
        engine.add_policy(low_quality_feature_policy()).unwrap();

        let pass = engine.execute_due(false).await;
        assert_eq!(pass.executions.len(), 1);
        assert_eq!(pass.executions[0].records_affected, 1);

        let next = engine.get_policy("test_low_quality").unwrap().next_execution;
        assert!(next.is_some_and(|t| t > Utc::now() + chrono::Duration::hours(11)));

        // Not due again until the interval passes.
        assert!(engine.execute_due(false).await.executions.is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_keeps_policy_due() {
        let (store, engine) = engine();
        engine.add_policy(low_quality_feature_policy()).unwrap();
        store.set_available(false);

        let pass = engine.execute_due(false).await;
        assert_eq!(pass.store_failures, 1);
        assert!(!pass.executions[0].success);
        assert!(engine.get_policy("test_low_quality").unwrap().next_execution.is_none());
        assert_eq!(engine.metrics().runs_failed, 1);
    }

    #[tokio::test]
    async fn test_fraction_cap_tightens() {
        let store = Arc::new(InMemoryRecordStore::new());
        let engine = RetentionPolicyEngine::new(
            store.clone(),
            PolicyEngineConfig::default()
                .without_defaults()
                .with_safety_fraction(0.5),
        );
        for i in 0..4 {
            let rec = aged_record(CacheType::Feature, &format!("old-{i}"), 0.1, 200, 0);
            store.put(&rec).await.unwrap();
        }
        for i in 0..2 {
            let rec = aged_record(CacheType::Feature, &format!("fresh-{i}"), 0.9, 1, 10);
            store.put(&rec).await.unwrap();
        }
        engine.add_policy(low_quality_feature_policy()).unwrap();

        let record = engine
            .execute_policy("test_low_quality", false)
            .await
            .unwrap()
            .unwrap();
        assert!(!record.success);
        assert_eq!(record.records_affected, 0);
        assert_eq!(store.count(CacheType::Feature).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let store = Arc::new(InMemoryRecordStore::new());
        let engine = RetentionPolicyEngine::new(
            store,
            PolicyEngineConfig::default()
                .without_defaults()
                .with_history_limit(3),
        );
        engine.add_policy(low_quality_feature_policy()).unwrap();
        for _ in 0..5 {
            engine.execute_policy("test_low_quality", true).await.unwrap();
        }
        assert_eq!(engine.history(10).len(), 3);
        assert_eq!(engine.history(1).len(), 1);
        assert_eq!(engine.metrics().runs, 5);
    }
}
