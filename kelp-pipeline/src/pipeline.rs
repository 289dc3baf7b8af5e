//! Feature extraction pipeline.
//!
//! Submissions go onto a bounded channel and never block the caller. One
//! worker drains the channel, running every registered extractor against each
//! record and caching each extractor's output through the retention manager.
//!
//! Per-submission states: `received → queued → extracting → cached | failed`.
//! Only malformed input reaches `failed`; extractor errors are isolated and
//! the record still ends up `cached` with whatever succeeded.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use kelp_core::{
    env_bool, env_parse, env_secs, ConfigError, KelpResult, PipelineError, PipelineTask,
    StorageError, TaskType, ValidationError,
};
use kelp_storage::RetentionManager;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch, Mutex};

use crate::domain::DomainRecord;
use crate::extractors::{default_extractors, FeatureExtractor, FeatureMap};
use crate::hooks::{HookEvent, HookPoint, HookRegistry};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the feature extraction pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Bounded queue length (default: 1024)
    pub queue_capacity: usize,
    /// How long the worker waits on an empty queue before looping (default: 15 minutes)
    pub idle_wait: Duration,
    /// Queue submissions for the worker; when false, submit processes inline
    pub background: bool,
    /// Task-state entries kept before terminal states are pruned (default: 10000)
    pub state_table_limit: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            idle_wait: Duration::from_secs(15 * 60),
            background: true,
            state_table_limit: 10_000,
        }
    }
}

impl PipelineConfig {
    /// Create PipelineConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `KELP_PIPELINE_QUEUE_CAPACITY`: queue length (default: 1024)
    /// - `KELP_PIPELINE_IDLE_WAIT_SECS`: worker idle wait (default: 900)
    /// - `KELP_PIPELINE_BACKGROUND`: queue instead of processing inline (default: true)
    /// - `KELP_PIPELINE_STATE_LIMIT`: task-state table size (default: 10000)
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            queue_capacity: env_parse("KELP_PIPELINE_QUEUE_CAPACITY", d.queue_capacity),
            idle_wait: env_secs("KELP_PIPELINE_IDLE_WAIT_SECS", d.idle_wait),
            background: env_bool("KELP_PIPELINE_BACKGROUND", d.background),
            state_table_limit: env_parse("KELP_PIPELINE_STATE_LIMIT", d.state_table_limit),
        }
    }

    /// Process submissions inline on the caller's task.
    pub fn synchronous() -> Self {
        Self {
            background: false,
            ..Self::default()
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_idle_wait(mut self, idle_wait: Duration) -> Self {
        self.idle_wait = idle_wait;
        self
    }

    pub fn with_background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.queue_capacity".to_string(),
                value: "0".to_string(),
                reason: "queue needs room for at least one task".to_string(),
            });
        }
        if self.idle_wait.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.idle_wait".to_string(),
                value: "0".to_string(),
                reason: "a zero wait would busy-poll the queue".to_string(),
            });
        }
        if self.state_table_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.state_table_limit".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// TASK STATE
// ============================================================================

/// Where a submission is in the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskState {
    Received,
    Queued,
    Extracting,
    /// Terminal. `failed` lists extractors that raised; `skipped` had nothing to read.
    Cached {
        succeeded: usize,
        failed: Vec<String>,
        skipped: usize,
    },
    /// Terminal. Malformed input only; re-submit to retry.
    Failed { reason: String },
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Cached { .. } | TaskState::Failed { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            TaskState::Received => "received",
            TaskState::Queued => "queued",
            TaskState::Extracting => "extracting",
            TaskState::Cached { .. } => "cached",
            TaskState::Failed { .. } => "failed",
        }
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters for pipeline activity.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub received: AtomicU64,
    pub processed: AtomicU64,
    pub failed: AtomicU64,
    pub features_extracted: AtomicU64,
    pub extractor_failures: AtomicU64,
    pub hooks_failed: AtomicU64,
    pub queue_rejections: AtomicU64,
}

impl PipelineMetrics {
    pub fn snapshot(&self) -> PipelineMetricsSnapshot {
        PipelineMetricsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            features_extracted: self.features_extracted.load(Ordering::Relaxed),
            extractor_failures: self.extractor_failures.load(Ordering::Relaxed),
            hooks_failed: self.hooks_failed.load(Ordering::Relaxed),
            queue_rejections: self.queue_rejections.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of pipeline metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineMetricsSnapshot {
    pub received: u64,
    pub processed: u64,
    pub failed: u64,
    pub features_extracted: u64,
    pub extractor_failures: u64,
    pub hooks_failed: u64,
    pub queue_rejections: u64,
}

/// Why one extractor produced nothing.
enum Skip {
    NotApplicable,
    Failed(PipelineError),
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct FeatureExtractionPipeline {
    manager: Arc<RetentionManager>,
    extractors: RwLock<Vec<Arc<dyn FeatureExtractor>>>,
    hooks: Arc<HookRegistry>,
    config: PipelineConfig,
    sender: mpsc::Sender<PipelineTask>,
    receiver: Mutex<Option<mpsc::Receiver<PipelineTask>>>,
    states: DashMap<String, TaskState>,
    metrics: PipelineMetrics,
    running: AtomicBool,
}

impl std::fmt::Debug for FeatureExtractionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureExtractionPipeline")
            .field("config", &self.config)
            .field("extractors", &self.extractor_names())
            .field("queue_depth", &self.queue_depth())
            .field("running", &self.is_running())
            .finish()
    }
}

impl FeatureExtractionPipeline {
    /// A pipeline with the built-in extractors and its own hook registry.
    pub fn new(manager: Arc<RetentionManager>, config: PipelineConfig) -> Self {
        Self::with_hooks(manager, config, Arc::new(HookRegistry::new()))
    }

    pub fn with_hooks(
        manager: Arc<RetentionManager>,
        config: PipelineConfig,
        hooks: Arc<HookRegistry>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            manager,
            extractors: RwLock::new(default_extractors()),
            hooks,
            config,
            sender,
            receiver: Mutex::new(Some(receiver)),
            states: DashMap::new(),
            metrics: PipelineMetrics::default(),
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn hooks(&self) -> Arc<HookRegistry> {
        Arc::clone(&self.hooks)
    }

    pub fn register_extractor(&self, extractor: Arc<dyn FeatureExtractor>) -> KelpResult<()> {
        let mut extractors = self
            .extractors
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        if extractors.iter().any(|e| e.name() == extractor.name()) {
            return Err(ValidationError::DuplicateId {
                id: extractor.name().to_string(),
            }
            .into());
        }
        tracing::info!(
            extractor = extractor.name(),
            kind = %extractor.kind(),
            "Extractor registered"
        );
        extractors.push(extractor);
        Ok(())
    }

    pub fn extractor_names(&self) -> Vec<String> {
        self.extractors
            .read()
            .map(|e| e.iter().map(|x| x.name().to_string()).collect())
            .unwrap_or_default()
    }

    pub fn state(&self, target_id: &str) -> Option<TaskState> {
        self.states.get(target_id).map(|s| s.value().clone())
    }

    pub fn metrics(&self) -> PipelineMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn queue_depth(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------------

    /// Handle a "record submitted" event.
    ///
    /// In background mode this only enqueues and returns `Queued`; a full
    /// queue is reported as [`PipelineError::QueueFull`]. In synchronous mode
    /// the record is processed before returning its terminal state.
    pub async fn submit_record(&self, target_id: &str, raw: Value) -> KelpResult<TaskState> {
        let task = PipelineTask::new(TaskType::ExtractFeatures, target_id, raw, Utc::now());
        self.submit(task).await
    }

    /// Queue a numeric series to be summarised into the aggregated-series cache.
    pub async fn submit_aggregation(
        &self,
        series_id: &str,
        time_window: &str,
        values: Vec<f64>,
    ) -> KelpResult<TaskState> {
        let payload = json!({"time_window": time_window, "values": values});
        let task = PipelineTask::new(TaskType::CreateAggregation, series_id, payload, Utc::now());
        self.submit(task).await
    }

    async fn submit(&self, task: PipelineTask) -> KelpResult<TaskState> {
        self.metrics.received.fetch_add(1, Ordering::Relaxed);
        let target_id = task.target_id.clone();
        self.set_state(&target_id, TaskState::Received);

        if !self.config.background {
            return Ok(self.process(task).await);
        }

        match self.sender.try_send(task) {
            Ok(()) => {
                self.set_state(&target_id, TaskState::Queued);
                tracing::debug!(target_id = %target_id, "Task queued");
                Ok(TaskState::Queued)
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.states.remove(&target_id);
                self.metrics.queue_rejections.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    target_id = %target_id,
                    capacity = self.config.queue_capacity,
                    "Pipeline queue full, submission rejected"
                );
                Err(PipelineError::QueueFull {
                    capacity: self.config.queue_capacity,
                }
                .into())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.states.remove(&target_id);
                Err(PipelineError::QueueClosed.into())
            }
        }
    }

    // ------------------------------------------------------------------------
    // Processing
    // ------------------------------------------------------------------------

    /// Run one task to a terminal state.
    pub async fn process(&self, task: PipelineTask) -> TaskState {
        self.set_state(&task.target_id, TaskState::Extracting);
        let outcome = match task.task_type {
            TaskType::ExtractFeatures => self.extract_all(&task).await,
            TaskType::CreateAggregation => self.aggregate(&task).await,
        };

        let state = match outcome {
            Ok(state) => {
                self.metrics.processed.fetch_add(1, Ordering::Relaxed);
                state
            }
            Err(e) => {
                self.metrics.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    task_id = %task.task_id,
                    target_id = %task.target_id,
                    error = %e,
                    "Task failed"
                );
                TaskState::Failed {
                    reason: e.to_string(),
                }
            }
        };
        self.set_state(&task.target_id, state.clone());
        state
    }

    async fn extract_all(&self, task: &PipelineTask) -> Result<TaskState, PipelineError> {
        let record = Arc::new(DomainRecord::from_value(&task.target_id, &task.payload)?);
        let extractors: Vec<Arc<dyn FeatureExtractor>> = match self.extractors.read() {
            Ok(e) => e.clone(),
            Err(_) => default_extractors(),
        };

        self.fire(HookEvent::new(
            HookPoint::BeforeSave,
            &record.record_id,
            task.payload.clone(),
        ));

        let mut succeeded = 0;
        let mut skipped = 0;
        let mut failed = Vec::new();
        for extractor in extractors {
            let name = extractor.name().to_string();
            let record_for_compute = Arc::clone(&record);
            let extractor_for_compute = Arc::clone(&extractor);
            let result: Result<FeatureMap, Skip> = self
                .manager
                .get_or_compute_features(
                    &record.record_id,
                    extractor.kind(),
                    json!({"extractor": name}),
                    move |_, _| async move {
                        run_extractor(extractor_for_compute.as_ref(), &record_for_compute)
                    },
                )
                .await;

            match result {
                Ok(features) => {
                    succeeded += 1;
                    self.metrics
                        .features_extracted
                        .fetch_add(features.len() as u64, Ordering::Relaxed);
                }
                Err(Skip::NotApplicable) => skipped += 1,
                Err(Skip::Failed(e)) => {
                    self.metrics.extractor_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        extractor = %name,
                        target_id = %record.record_id,
                        error = %e,
                        "Extractor failed, continuing with the rest"
                    );
                    failed.push(name);
                }
            }
        }

        self.fire(HookEvent::new(
            HookPoint::AfterSave,
            &record.record_id,
            json!({"succeeded": succeeded, "failed": failed, "skipped": skipped}),
        ));

        tracing::debug!(
            target_id = %record.record_id,
            succeeded,
            failed = failed.len(),
            skipped,
            "Features extracted"
        );
        Ok(TaskState::Cached {
            succeeded,
            failed,
            skipped,
        })
    }

    async fn aggregate(&self, task: &PipelineTask) -> Result<TaskState, PipelineError> {
        #[derive(Deserialize)]
        struct AggregationRequest {
            time_window: String,
            values: Vec<f64>,
        }

        let request: AggregationRequest = serde_json::from_value(task.payload.clone())
            .map_err(|e| PipelineError::MalformedRecord {
                target_id: task.target_id.clone(),
                reason: e.to_string(),
            })?;
        if request.values.is_empty() {
            return Err(PipelineError::MalformedRecord {
                target_id: task.target_id.clone(),
                reason: "no values to aggregate".to_string(),
            });
        }

        let values = request.values;
        let summary: Value = self
            .manager
            .get_or_aggregate(
                &task.target_id,
                &request.time_window,
                json!({"values": values}),
                move |_, _| async move { Ok::<_, PipelineError>(summarise(&values)) },
            )
            .await?;
        tracing::debug!(series_id = %task.target_id, summary = %summary, "Series aggregated");
        Ok(TaskState::Cached {
            succeeded: 1,
            failed: Vec::new(),
            skipped: 0,
        })
    }

    fn fire(&self, event: HookEvent) {
        let failed = self.hooks.fire(&event);
        if failed > 0 {
            self.metrics
                .hooks_failed
                .fetch_add(failed as u64, Ordering::Relaxed);
        }
    }

    fn set_state(&self, target_id: &str, state: TaskState) {
        let full = self.states.len() >= self.config.state_table_limit;
        if full && !self.states.contains_key(target_id) {
            self.states.retain(|_, s| !s.is_terminal());
        }
        self.states.insert(target_id.to_string(), state);
    }

    // ------------------------------------------------------------------------
    // Worker
    // ------------------------------------------------------------------------

    /// Drain the queue until `shutdown_rx` flips to true.
    ///
    /// An empty queue is waited on for `idle_wait` at a time. On shutdown the
    /// tasks already queued are processed before returning. Only one worker
    /// runs at a time; the queue survives a stop, so the worker can be started
    /// again.
    pub async fn run_worker(
        self: Arc<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> PipelineMetricsSnapshot {
        let Some(mut rx) = self.receiver.lock().await.take() else {
            tracing::warn!("Pipeline worker already running");
            return self.metrics.snapshot();
        };
        self.running.store(true, Ordering::SeqCst);
        tracing::info!(
            queue_capacity = self.config.queue_capacity,
            idle_wait_secs = self.config.idle_wait.as_secs(),
            "Pipeline worker started"
        );

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                next = tokio::time::timeout(self.config.idle_wait, rx.recv()) => {
                    match next {
                        Ok(Some(task)) => {
                            self.process(task).await;
                        }
                        Ok(None) => break,
                        Err(_) => tracing::trace!("Pipeline queue idle"),
                    }
                }
            }
        }

        let mut drained = 0u64;
        while let Ok(task) = rx.try_recv() {
            self.process(task).await;
            drained += 1;
        }

        *self.receiver.lock().await = Some(rx);
        self.running.store(false, Ordering::SeqCst);

        let snapshot = self.metrics.snapshot();
        tracing::info!(
            drained,
            processed = snapshot.processed,
            failed = snapshot.failed,
            extractor_failures = snapshot.extractor_failures,
            "Pipeline worker stopped"
        );
        snapshot
    }
}

fn run_extractor(
    extractor: &dyn FeatureExtractor,
    record: &DomainRecord,
) -> Result<FeatureMap, Skip> {
    match catch_unwind(AssertUnwindSafe(|| extractor.extract(record))) {
        Ok(Ok(Some(features))) => Ok(features),
        Ok(Ok(None)) => Err(Skip::NotApplicable),
        Ok(Err(e)) => Err(Skip::Failed(e)),
        Err(_) => Err(Skip::Failed(PipelineError::ExtractionFailed {
            extractor: extractor.name().to_string(),
            target_id: record.record_id.clone(),
            reason: "extractor panicked".to_string(),
        })),
    }
}

/// Count, sum, mean, min, max and population standard deviation.
fn summarise(values: &[f64]) -> Value {
    let count = values.len() as f64;
    let sum: f64 = values.iter().sum();
    let mean = sum / count;
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count;
    json!({
        "count": values.len(),
        "sum": sum,
        "mean": mean,
        "min": min,
        "max": max,
        "std_dev": variance.sqrt(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kelp_storage::{CacheConfig, InMemoryRecordStore};
    use kelp_test_utils::fixtures::domain_record_json;

    fn pipeline(config: PipelineConfig) -> FeatureExtractionPipeline {
        let manager = Arc::new(RetentionManager::new(
            Arc::new(InMemoryRecordStore::new()),
            CacheConfig::default(),
        ));
        FeatureExtractionPipeline::new(manager, config)
    }

    #[test]
    fn test_config_validation() {
        assert!(PipelineConfig::default().validate().is_ok());
        assert!(PipelineConfig::default()
            .with_queue_capacity(0)
            .validate()
            .is_err());
        assert!(PipelineConfig::default()
            .with_idle_wait(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_summarise() {
        let summary = summarise(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(summary["count"], json!(8));
        assert_eq!(summary["mean"], json!(5.0));
        assert_eq!(summary["std_dev"], json!(2.0));
        assert_eq!(summary["min"], json!(2.0));
        assert_eq!(summary["max"], json!(9.0));
    }

    #[tokio::test]
    async fn test_synchronous_submit_reaches_cached() {
        let p = pipeline(PipelineConfig::synchronous());
        let state = p.submit_record("st-1", domain_record_json("st-1")).await.unwrap();
        assert_eq!(
            state,
            TaskState::Cached {
                succeeded: 4,
                failed: vec![],
                skipped: 0
            }
        );
        assert_eq!(p.state("st-1"), Some(state));
        assert_eq!(p.metrics().processed, 1);
    }

    #[tokio::test]
    async fn test_malformed_record_fails() {
        let p = pipeline(PipelineConfig::synchronous());
        let state = p
            .submit_record("bad", json!({"record_id": "bad"}))
            .await
            .unwrap();
        assert_eq!(state.name(), "failed");
        assert_eq!(p.metrics().failed, 1);
        assert_eq!(p.metrics().processed, 0);
    }

    #[tokio::test]
    async fn test_aggregation_task() {
        let p = pipeline(PipelineConfig::synchronous());
        let state = p
            .submit_aggregation("sst-luanda", "2024-07", vec![17.0, 18.5, 19.0])
            .await
            .unwrap();
        assert!(matches!(state, TaskState::Cached { succeeded: 1, .. }));

        let empty = p.submit_aggregation("sst-empty", "2024-07", vec![]).await.unwrap();
        assert!(matches!(empty, TaskState::Failed { .. }));
    }

    #[tokio::test]
    async fn test_state_table_prunes_terminal_states() {
        let mut config = PipelineConfig::synchronous();
        config.state_table_limit = 2;
        let p = pipeline(config);
        for i in 0..3 {
            let id = format!("st-{i}");
            p.submit_record(&id, domain_record_json(&id)).await.unwrap();
        }
        assert!(p.state("st-0").is_none());
        assert!(p.state("st-2").is_some());
    }
}
