//! Installs and removes caching decorators over registered function slots.

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use kelp_core::{
    CacheMode, CacheType, HealthCheck, HealthStatus, IntegrationError, KelpResult, StorageError,
    ValidationError,
};
use kelp_pipeline::{FeatureExtractionPipeline, HookRegistry};
use kelp_storage::RetentionManager;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::IntegrationConfig;
use crate::decorators::{CachedCall, CallCounters, KeySpec, RecordRetrieval};
use crate::function::{FunctionSlot, MlEndpoints, MlFunction};

enum TargetKind {
    Cached(KeySpec),
    RecordRetrieval,
}

struct Target {
    slot: Arc<FunctionSlot>,
    kind: TargetKind,
}

/// The function a slot held before its decorator went in.
struct Saved {
    slot: Arc<FunctionSlot>,
    original: Arc<dyn MlFunction>,
}

#[derive(Default)]
struct State {
    targets: Vec<Target>,
    saved: Vec<Saved>,
    enabled: bool,
}

/// Outcome of [`IntegrationLayer::disable`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreReport {
    pub restored: Vec<String>,
    pub failed: Vec<String>,
}

impl RestoreReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationMetricsSnapshot {
    pub enabled: bool,
    pub edge_mode: bool,
    pub targets: usize,
    pub calls_intercepted: u64,
    pub served_from_cache: u64,
    pub computed: u64,
    /// Calls whose arguments had no cache key and went to the original.
    pub direct_calls: u64,
    pub records_enqueued: u64,
    pub enqueue_failures: u64,
    pub originals_preserved: usize,
    /// Cached answers over decorated calls that reached the cache.
    pub cache_hit_ratio: f64,
}

/// Owns the decorators placed over externally owned ML functions.
///
/// `enable` either wraps every registered target or none of them; `disable`
/// puts each saved original back into its slot.
pub struct IntegrationLayer {
    manager: Arc<RetentionManager>,
    pipeline: Option<Arc<FeatureExtractionPipeline>>,
    hooks: Option<Arc<HookRegistry>>,
    config: IntegrationConfig,
    state: Mutex<State>,
    /// Manager mode to return to, present while edge mode is on.
    edge_restore: Mutex<Option<CacheMode>>,
    counters: Arc<CallCounters>,
}

impl fmt::Debug for IntegrationLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntegrationLayer")
            .field("config", &self.config)
            .field("targets", &self.target_names())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl IntegrationLayer {
    pub fn new(manager: Arc<RetentionManager>, config: IntegrationConfig) -> Self {
        Self {
            manager,
            pipeline: None,
            hooks: None,
            config,
            state: Mutex::new(State::default()),
            edge_restore: Mutex::new(None),
            counters: Arc::new(CallCounters::default()),
        }
    }

    /// Route retrieved records into `pipeline` and fire its hooks around
    /// predictions and training runs.
    pub fn with_pipeline(mut self, pipeline: Arc<FeatureExtractionPipeline>) -> Self {
        self.hooks = Some(pipeline.hooks());
        self.pipeline = Some(pipeline);
        self
    }

    pub fn config(&self) -> &IntegrationConfig {
        &self.config
    }

    /// Register the four standard ML entry points.
    pub fn attach_endpoints(&self, endpoints: &MlEndpoints) -> KelpResult<()> {
        let ttl = self.config.prediction_ttl;
        self.register(&endpoints.predict, TargetKind::Cached(KeySpec::Prediction { ttl }))?;
        self.register(&endpoints.prepare_training, TargetKind::Cached(KeySpec::Training))?;
        self.register(&endpoints.extract_features, TargetKind::Cached(KeySpec::Features))?;
        self.register(&endpoints.get_record, TargetKind::RecordRetrieval)
    }

    /// Register any other function whose whole argument object identifies its
    /// result.
    pub fn register_target(&self, slot: &Arc<FunctionSlot>, cache_type: CacheType) -> KelpResult<()> {
        self.register(slot, TargetKind::Cached(KeySpec::Custom { cache_type }))
    }

    fn register(&self, slot: &Arc<FunctionSlot>, kind: TargetKind) -> KelpResult<()> {
        let mut state = self.lock()?;
        if state.targets.iter().any(|t| t.slot.name() == slot.name()) {
            return Err(ValidationError::DuplicateId {
                id: slot.name().to_string(),
            }
            .into());
        }
        tracing::debug!(target_fn = slot.name(), "Integration target registered");
        state.targets.push(Target {
            slot: Arc::clone(slot),
            kind,
        });
        Ok(())
    }

    pub fn target_names(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.targets.iter().map(|t| t.slot.name().to_string()).collect())
            .unwrap_or_default()
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().map(|s| s.enabled).unwrap_or(false)
    }

    /// Install a decorator over every registered target.
    ///
    /// If any target cannot be wrapped, the ones already wrapped are restored
    /// before the error is returned.
    pub fn enable(&self) -> KelpResult<()> {
        let mut state = self.lock()?;
        if state.enabled {
            return Err(IntegrationError::AlreadyEnabled.into());
        }

        let mut saved = Vec::with_capacity(state.targets.len());
        for target in &state.targets {
            match self.wrap(target) {
                Ok(original) => saved.push(Saved {
                    slot: Arc::clone(&target.slot),
                    original,
                }),
                Err(reason) => {
                    let name = target.slot.name().to_string();
                    let rolled_back = restore_all(&mut saved);
                    tracing::error!(
                        target_fn = %name,
                        reason = %reason,
                        rolled_back = rolled_back.restored.len(),
                        "Failed to install decorator, integration rolled back"
                    );
                    return Err(IntegrationError::WrapFailed {
                        target: name,
                        reason,
                    }
                    .into());
                }
            }
        }

        let wrapped = saved.len();
        state.saved = saved;
        state.enabled = true;
        drop(state);

        if self.config.edge_mode {
            self.enable_edge_mode()?;
        }
        tracing::info!(targets = wrapped, edge_mode = self.config.edge_mode, "Integration enabled");
        Ok(())
    }

    fn wrap(&self, target: &Target) -> Result<Arc<dyn MlFunction>, String> {
        let name = target.slot.name();
        let original = target.slot.current().map_err(|e| e.to_string())?;
        let decorator: Arc<dyn MlFunction> = match &target.kind {
            TargetKind::Cached(spec) => Arc::new(CachedCall::new(
                name,
                spec.clone(),
                Arc::clone(&original),
                Arc::clone(&self.manager),
                self.hooks.clone(),
                Arc::clone(&self.counters),
            )),
            TargetKind::RecordRetrieval => {
                let pipeline = self
                    .pipeline
                    .as_ref()
                    .ok_or_else(|| "no feature pipeline attached".to_string())?;
                Arc::new(RecordRetrieval::new(
                    name,
                    Arc::clone(&original),
                    Arc::clone(pipeline),
                    Arc::clone(&self.counters),
                ))
            }
        };
        target.slot.replace(decorator).map_err(|e| e.to_string())
    }

    /// Put every saved original back. Originals that could not be restored
    /// stay saved and the layer stays enabled so a later call can retry.
    pub fn disable(&self) -> KelpResult<RestoreReport> {
        let mut state = self.lock()?;
        if !state.enabled {
            return Err(IntegrationError::NotEnabled.into());
        }

        let report = restore_all(&mut state.saved);
        state.enabled = !state.saved.is_empty();
        let still_enabled = state.enabled;
        drop(state);

        if !still_enabled && self.is_edge_mode() {
            self.disable_edge_mode()?;
        }
        if report.is_complete() {
            tracing::info!(restored = report.restored.len(), "Integration disabled");
        } else {
            tracing::error!(
                restored = report.restored.len(),
                failed = ?report.failed,
                "Integration partially disabled"
            );
        }
        Ok(report)
    }

    /// Serve from memory only and never write to the persistent tier.
    ///
    /// The manager's current mode is kept and put back by
    /// [`disable_edge_mode`](Self::disable_edge_mode).
    pub fn enable_edge_mode(&self) -> KelpResult<()> {
        let mut restore = self.edge_restore.lock().map_err(|_| StorageError::LockPoisoned)?;
        if restore.is_none() {
            *restore = Some(self.manager.mode());
        }
        self.manager.set_mode(CacheMode::ReadOnly);
        Ok(())
    }

    /// Leave edge mode, returning the manager to the mode it had before.
    /// A no-op outside edge mode.
    pub fn disable_edge_mode(&self) -> KelpResult<()> {
        let mut restore = self.edge_restore.lock().map_err(|_| StorageError::LockPoisoned)?;
        if let Some(mode) = restore.take() {
            self.manager.set_mode(mode);
        }
        Ok(())
    }

    pub fn is_edge_mode(&self) -> bool {
        self.edge_restore
            .lock()
            .map(|r| r.is_some())
            .unwrap_or(false)
    }

    pub fn metrics(&self) -> IntegrationMetricsSnapshot {
        let c = &self.counters;
        let served = c.served_from_cache.load(Ordering::Relaxed);
        let computed = c.computed.load(Ordering::Relaxed);
        let answered = served + computed;
        let (enabled, targets, originals_preserved) = self
            .state
            .lock()
            .map(|s| (s.enabled, s.targets.len(), s.saved.len()))
            .unwrap_or_default();
        IntegrationMetricsSnapshot {
            enabled,
            edge_mode: self.is_edge_mode(),
            targets,
            calls_intercepted: c.intercepted.load(Ordering::Relaxed),
            served_from_cache: served,
            computed,
            direct_calls: c.direct_calls.load(Ordering::Relaxed),
            records_enqueued: c.records_enqueued.load(Ordering::Relaxed),
            enqueue_failures: c.enqueue_failures.load(Ordering::Relaxed),
            originals_preserved,
            cache_hit_ratio: if answered == 0 {
                0.0
            } else {
                served as f64 / answered as f64
            },
        }
    }

    /// Health of caching plus the background tasks named in `background`
    /// as `(name, running)` pairs.
    pub fn health(&self, background: &[(&str, bool)]) -> HealthCheck {
        let stats = self.manager.statistics();
        let metrics = self.metrics();
        let mut check = HealthCheck::healthy("integration")
            .with_metadata("enabled", json!(metrics.enabled))
            .with_metadata("edge_mode", json!(metrics.edge_mode))
            .with_metadata("cache_hit_ratio", json!(stats.hit_ratio))
            .with_metadata("calls_intercepted", json!(metrics.calls_intercepted));

        let lookups = stats.hits + stats.misses;
        if lookups > 0 && stats.hit_ratio < self.config.poor_hit_ratio {
            check = check.with_issue(
                HealthStatus::Degraded,
                format!("poor cache hit ratio {:.1}%", stats.hit_ratio * 100.0),
            );
        }
        if stats.degraded {
            check = check.with_issue(HealthStatus::Degraded, "persistent store is being skipped");
        }
        if let Some(pipeline) = &self.pipeline {
            if pipeline.config().background && !pipeline.is_running() {
                check = check.with_issue(HealthStatus::Degraded, "pipeline worker stopped");
            }
        }
        for (name, running) in background {
            if !running {
                check = check.with_issue(HealthStatus::Degraded, format!("{name} stopped"));
            }
        }
        check
    }

    fn lock(&self) -> KelpResult<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| StorageError::LockPoisoned.into())
    }
}

/// Restore newest first. Entries that fail stay in `saved`.
fn restore_all(saved: &mut Vec<Saved>) -> RestoreReport {
    let mut report = RestoreReport::default();
    let mut kept = Vec::new();
    while let Some(entry) = saved.pop() {
        let name = entry.slot.name().to_string();
        match entry.slot.replace(Arc::clone(&entry.original)) {
            Ok(_) => report.restored.push(name),
            Err(e) => {
                let err = IntegrationError::RestoreFailed {
                    target: name.clone(),
                    reason: e.to_string(),
                };
                tracing::error!(error = %err, "Original left behind its decorator");
                report.failed.push(name);
                kept.push(entry);
            }
        }
    }
    kept.reverse();
    *saved = kept;
    report
}
