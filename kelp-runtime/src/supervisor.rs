//! Owns every component and the three background tasks.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use kelp_core::{
    HealthCheck, HealthStatus, KelpResult, PolicyExecutionRecord, PolicyUpdate, RetentionPolicy,
    StorageError,
};
use kelp_integration::{IntegrationLayer, MlEndpoints, RestoreReport};
use kelp_monitor::{
    run_sampler, Dashboard, ManagerSource, MonitorMetricsSnapshot, PerformanceMonitor,
    PerformanceReport,
};
use kelp_pipeline::{FeatureExtractionPipeline, PipelineMetricsSnapshot};
use kelp_policy::{run_scheduler, CleanupReport, PolicyMetricsSnapshot, PolicyStatus, RetentionPolicyEngine};
use kelp_storage::{
    CacheStatistics, InMemoryRecordStore, LmdbRecordStore, PersistentStore, RetentionManager,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::KelpConfig;
use crate::error::{RuntimeError, RuntimeResult};

/// The long-lived tasks a supervisor runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundTask {
    PipelineWorker,
    PolicyScheduler,
    MonitorSampler,
}

impl BackgroundTask {
    pub const ALL: [BackgroundTask; 3] = [
        BackgroundTask::PipelineWorker,
        BackgroundTask::PolicyScheduler,
        BackgroundTask::MonitorSampler,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackgroundTask::PipelineWorker => "pipeline_worker",
            BackgroundTask::PolicyScheduler => "policy_scheduler",
            BackgroundTask::MonitorSampler => "monitor_sampler",
        }
    }
}

impl fmt::Display for BackgroundTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackgroundTask {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BackgroundTask::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| format!("unknown background task: {s}"))
    }
}

/// Final counters a task returned when it stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum TaskExit {
    PipelineWorker(PipelineMetricsSnapshot),
    PolicyScheduler(PolicyMetricsSnapshot),
    MonitorSampler(MonitorMetricsSnapshot),
}

enum Running {
    Pipeline(JoinHandle<PipelineMetricsSnapshot>),
    Scheduler(JoinHandle<PolicyMetricsSnapshot>),
    Sampler(JoinHandle<MonitorMetricsSnapshot>),
}

struct TaskHandle {
    shutdown: watch::Sender<bool>,
    running: Running,
}

impl TaskHandle {
    async fn stop(self, task: BackgroundTask) -> RuntimeResult<TaskExit> {
        // The task may already have exited and dropped its receiver.
        let _ = self.shutdown.send(true);
        let join_err = |e: tokio::task::JoinError| RuntimeError::Task {
            task: task.as_str(),
            reason: e.to_string(),
        };
        Ok(match self.running {
            Running::Pipeline(h) => TaskExit::PipelineWorker(h.await.map_err(join_err)?),
            Running::Scheduler(h) => TaskExit::PolicyScheduler(h.await.map_err(join_err)?),
            Running::Sampler(h) => TaskExit::MonitorSampler(h.await.map_err(join_err)?),
        })
    }
}

#[derive(Default)]
struct Tasks {
    pipeline: Option<TaskHandle>,
    scheduler: Option<TaskHandle>,
    sampler: Option<TaskHandle>,
}

impl Tasks {
    fn slot(&mut self, task: BackgroundTask) -> &mut Option<TaskHandle> {
        match task {
            BackgroundTask::PipelineWorker => &mut self.pipeline,
            BackgroundTask::PolicyScheduler => &mut self.scheduler,
            BackgroundTask::MonitorSampler => &mut self.sampler,
        }
    }
}

/// Health of every component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub checks: Vec<HealthCheck>,
}

/// Components built from one [`KelpConfig`], sharing one persistent store.
///
/// Tasks are started and stopped individually; [`shutdown`](Self::shutdown)
/// stops whatever is running and waits for in-flight work to finish.
pub struct Supervisor {
    config: KelpConfig,
    manager: Arc<RetentionManager>,
    pipeline: Arc<FeatureExtractionPipeline>,
    engine: Arc<RetentionPolicyEngine>,
    monitor: Arc<PerformanceMonitor>,
    integration: IntegrationLayer,
    tasks: Mutex<Tasks>,
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("config", &self.config)
            .field("running", &self.running_tasks())
            .finish()
    }
}

impl Supervisor {
    /// Build every component over `store`.
    pub fn new(store: Arc<dyn PersistentStore>, config: KelpConfig) -> RuntimeResult<Self> {
        config.validate()?;

        let manager = Arc::new(RetentionManager::new(store, config.cache.clone()));
        let pipeline = Arc::new(FeatureExtractionPipeline::new(
            Arc::clone(&manager),
            config.pipeline.clone(),
        ));
        let engine = Arc::new(RetentionPolicyEngine::for_manager(
            &manager,
            config.policy.clone(),
        ));
        let monitor = Arc::new(PerformanceMonitor::new(config.monitor.clone()));
        monitor.register_source(Arc::new(ManagerSource::new(Arc::clone(&manager))))?;
        let integration = IntegrationLayer::new(Arc::clone(&manager), config.integration.clone())
            .with_pipeline(Arc::clone(&pipeline));

        tracing::info!(
            memory_capacity = config.cache.memory_capacity_per_type,
            policies = engine.policies().len(),
            pipeline_background = config.pipeline.background,
            "Supervisor built"
        );
        Ok(Self {
            config,
            manager,
            pipeline,
            engine,
            monitor,
            integration,
            tasks: Mutex::new(Tasks::default()),
        })
    }

    /// Build over LMDB when `storage.lmdb_path` is set, otherwise over an
    /// in-memory store.
    pub fn open(config: KelpConfig) -> RuntimeResult<Self> {
        let store: Arc<dyn PersistentStore> = match &config.storage.lmdb_path {
            Some(path) => {
                tracing::info!(path = %path.display(), "Opening LMDB record store");
                Arc::new(LmdbRecordStore::open(path, config.storage.lmdb_max_size_mb)?)
            }
            None => {
                tracing::warn!("No LMDB path configured, records live in memory only");
                Arc::new(InMemoryRecordStore::new())
            }
        };
        Self::new(store, config)
    }

    pub fn config(&self) -> &KelpConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<RetentionManager> {
        &self.manager
    }

    pub fn pipeline(&self) -> &Arc<FeatureExtractionPipeline> {
        &self.pipeline
    }

    pub fn engine(&self) -> &Arc<RetentionPolicyEngine> {
        &self.engine
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    pub fn integration(&self) -> &IntegrationLayer {
        &self.integration
    }

    // ------------------------------------------------------------------------
    // Background tasks
    // ------------------------------------------------------------------------

    /// Spawn `task`. Returns `false` if it is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, task: BackgroundTask) -> RuntimeResult<bool> {
        let mut tasks = self.lock_tasks()?;
        let slot = tasks.slot(task);
        if slot.as_ref().is_some_and(|h| !is_finished(&h.running)) {
            return Ok(false);
        }

        let (shutdown, rx) = watch::channel(false);
        let running = match task {
            BackgroundTask::PipelineWorker => {
                Running::Pipeline(tokio::spawn(Arc::clone(&self.pipeline).run_worker(rx)))
            }
            BackgroundTask::PolicyScheduler => {
                Running::Scheduler(tokio::spawn(run_scheduler(Arc::clone(&self.engine), rx)))
            }
            BackgroundTask::MonitorSampler => {
                Running::Sampler(tokio::spawn(run_sampler(Arc::clone(&self.monitor), rx)))
            }
        };
        *slot = Some(TaskHandle { shutdown, running });
        tracing::info!(task = %task, "Background task started");
        Ok(true)
    }

    /// Start every task not already running.
    pub fn start_all(&self) -> RuntimeResult<()> {
        for task in BackgroundTask::ALL {
            self.start(task)?;
        }
        Ok(())
    }

    /// Signal `task` to stop and wait for it. `None` if it was not started.
    pub async fn stop(&self, task: BackgroundTask) -> RuntimeResult<Option<TaskExit>> {
        let handle = self.lock_tasks()?.slot(task).take();
        let Some(handle) = handle else {
            return Ok(None);
        };
        let exit = handle.stop(task).await?;
        tracing::info!(task = %task, "Background task stopped");
        Ok(Some(exit))
    }

    /// Stop every task, in reverse start order. A task that fails to stop is
    /// logged and the rest are still stopped.
    pub async fn shutdown(&self) -> Vec<TaskExit> {
        let mut exits = Vec::new();
        for task in BackgroundTask::ALL.into_iter().rev() {
            match self.stop(task).await {
                Ok(Some(exit)) => exits.push(exit),
                Ok(None) => {}
                Err(e) => tracing::error!(task = %task, error = %e, "Background task did not stop cleanly"),
            }
        }
        tracing::info!(stopped = exits.len(), "Supervisor shut down");
        exits
    }

    /// Whether `task` has been started and has not finished.
    pub fn is_running(&self, task: BackgroundTask) -> bool {
        self.tasks
            .lock()
            .map(|mut t| t.slot(task).as_ref().is_some_and(|h| !is_finished(&h.running)))
            .unwrap_or(false)
    }

    pub fn running_tasks(&self) -> Vec<BackgroundTask> {
        BackgroundTask::ALL
            .into_iter()
            .filter(|t| self.is_running(*t))
            .collect()
    }

    fn lock_tasks(&self) -> KelpResult<std::sync::MutexGuard<'_, Tasks>> {
        self.tasks
            .lock()
            .map_err(|_| StorageError::LockPoisoned.into())
    }

    // ------------------------------------------------------------------------
    // Admin operations
    // ------------------------------------------------------------------------

    pub fn statistics(&self) -> CacheStatistics {
        self.manager.statistics()
    }

    pub fn policy_status(&self) -> PolicyStatus {
        self.engine.status()
    }

    pub fn policy_history(&self, limit: usize) -> Vec<PolicyExecutionRecord> {
        self.engine.history(limit)
    }

    pub async fn cleanup_report(&self) -> CleanupReport {
        self.engine.cleanup_report().await
    }

    pub fn dashboard(&self) -> Dashboard {
        self.monitor.dashboard()
    }

    /// Report over the `period` ending now.
    pub fn report(&self, period: chrono::Duration) -> PerformanceReport {
        self.monitor.report(period, Utc::now())
    }

    pub fn add_policy(&self, policy: RetentionPolicy) -> KelpResult<()> {
        self.engine.add_policy(policy)
    }

    pub fn remove_policy(&self, policy_id: &str) -> KelpResult<RetentionPolicy> {
        self.engine.remove_policy(policy_id)
    }

    pub fn update_policy(&self, policy_id: &str, update: &PolicyUpdate) -> KelpResult<RetentionPolicy> {
        self.engine.update_policy(policy_id, update)
    }

    /// Run one policy immediately. `None` when it is already running.
    pub async fn execute_policy(
        &self,
        policy_id: &str,
        dry_run: bool,
    ) -> KelpResult<Option<PolicyExecutionRecord>> {
        self.engine.execute_policy(policy_id, dry_run).await
    }

    /// Register the ML entry points and install caching over them.
    pub fn enable_integration(&self, endpoints: &MlEndpoints) -> KelpResult<()> {
        if self.integration.target_names().is_empty() {
            self.integration.attach_endpoints(endpoints)?;
        }
        self.integration.enable()
    }

    pub fn disable_integration(&self) -> KelpResult<RestoreReport> {
        self.integration.disable()
    }

    pub fn health(&self) -> SystemHealth {
        let background: Vec<(&str, bool)> = [BackgroundTask::PolicyScheduler, BackgroundTask::MonitorSampler]
            .into_iter()
            .map(|t| (t.as_str(), self.is_running(t)))
            .collect();
        let checks = vec![
            self.monitor.health(),
            self.integration.health(&background),
        ];
        SystemHealth {
            status: HealthCheck::overall(&checks),
            checks,
        }
    }
}

fn is_finished(running: &Running) -> bool {
    match running {
        Running::Pipeline(h) => h.is_finished(),
        Running::Scheduler(h) => h.is_finished(),
        Running::Sampler(h) => h.is_finished(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_names_round_trip() {
        for task in BackgroundTask::ALL {
            assert_eq!(task.as_str().parse::<BackgroundTask>().unwrap(), task);
        }
        assert!("janitor".parse::<BackgroundTask>().is_err());
    }
}
