//! End-to-end scenarios through a supervisor.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kelp_core::{
    CacheType, HealthStatus, PolicyAction, PolicyUpdate, RetentionPolicy, RetentionPriority,
};
use kelp_integration::{ml_fn, MlEndpoints};
use kelp_runtime::{BackgroundTask, KelpConfig, Supervisor, TaskExit};
use kelp_storage::{CacheRequest, InMemoryRecordStore};
use kelp_test_utils::CountingCompute;
use serde_json::{json, Map, Value};

fn supervisor() -> Supervisor {
    let mut config = KelpConfig::default();
    config.policy.load_defaults = false;
    Supervisor::new(Arc::new(InMemoryRecordStore::new()), config).unwrap()
}

/// Nineteen populated fields and one null: completeness 0.95.
fn survey_summary() -> Value {
    let mut fields: Map<String, Value> = (0..19)
        .map(|i| (format!("field_{i:02}"), json!(i + 1)))
        .collect();
    fields.insert("field_19".to_string(), Value::Null);
    Value::Object(fields)
}

#[tokio::test]
async fn high_quality_artifact_gets_critical_priority_and_longest_retention() {
    let supervisor = supervisor();
    let manager = supervisor.manager();
    let request = CacheRequest::new(CacheType::AggregatedSeries, "benguela-2024-q3");
    let key = request.key();

    let value: Value = manager
        .get_or_compute(request, |_, _| async { Ok::<_, String>(survey_summary()) })
        .await
        .unwrap();
    assert_eq!(value, survey_summary());

    let record = manager
        .store()
        .get(CacheType::AggregatedSeries, &key)
        .await
        .unwrap()
        .unwrap();
    assert!((record.quality_score - 0.95).abs() < 1e-9);
    assert_eq!(record.priority, RetentionPriority::Critical);
    assert_eq!(record.retention_days, 730);
    assert_eq!(
        record.retention_days,
        supervisor.config().cache.retention_tiers.critical_days
    );
}

#[tokio::test]
async fn identical_inference_requests_invoke_the_model_once() {
    let supervisor = supervisor();
    let model_calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&model_calls);
    let echo = || ml_fn(|args: Value| async move { Ok(args) });
    let endpoints = MlEndpoints::new(
        ml_fn(move |_args: Value| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!({"presence_probability": 0.81}))
            }
        }),
        echo(),
        echo(),
        echo(),
    );
    supervisor.enable_integration(&endpoints).unwrap();

    let request = json!({"model_id": "seagrass-presence-v1", "input": {"site": "NB-04"}});
    let first = endpoints.predict.call(request.clone()).await.unwrap();
    let second = endpoints.predict.call(request).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(model_calls.load(Ordering::SeqCst), 1);
    assert_eq!(supervisor.statistics().computed, 1);

    let report = supervisor.disable_integration().unwrap();
    assert_eq!(report.restored.len(), 4);
}

#[tokio::test]
async fn tasks_start_and_stop_individually() {
    let supervisor = supervisor();

    assert!(supervisor.start(BackgroundTask::PolicyScheduler).unwrap());
    assert!(!supervisor.start(BackgroundTask::PolicyScheduler).unwrap());
    assert_eq!(
        supervisor.running_tasks(),
        vec![BackgroundTask::PolicyScheduler]
    );

    let exit = supervisor
        .stop(BackgroundTask::PolicyScheduler)
        .await
        .unwrap();
    assert!(matches!(exit, Some(TaskExit::PolicyScheduler(_))));
    assert!(supervisor
        .stop(BackgroundTask::PolicyScheduler)
        .await
        .unwrap()
        .is_none());
    assert!(!supervisor.engine().is_scheduler_running());

    // Restartable after a stop.
    assert!(supervisor.start(BackgroundTask::PolicyScheduler).unwrap());
    supervisor.shutdown().await;
}

#[tokio::test]
async fn shutdown_stops_every_task_and_health_follows() {
    let supervisor = supervisor();
    let idle = supervisor.health();
    assert_eq!(idle.status, HealthStatus::Degraded);

    supervisor.start_all().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(supervisor.pipeline().is_running());
    assert!(supervisor.monitor().is_sampler_running());
    assert_eq!(supervisor.health().status, HealthStatus::Healthy);

    let exits = supervisor.shutdown().await;
    assert_eq!(exits.len(), 3);
    assert!(supervisor.running_tasks().is_empty());
    assert!(!supervisor.pipeline().is_running());
    assert!(!supervisor.monitor().is_sampler_running());
}

#[tokio::test]
async fn admin_policy_operations() {
    let supervisor = supervisor();
    let policy = RetentionPolicy::new(
        "unused_inference",
        "Unused inference results",
        CacheType::Inference,
        PolicyAction::Delete,
    )
    .with_retention_days(30)
    .with_min_access_count(2);
    supervisor.add_policy(policy.clone()).unwrap();
    assert!(supervisor.add_policy(policy).is_err());

    let status = supervisor.policy_status();
    assert_eq!(status.total_policies, 1);
    assert_eq!(status.enabled_policies, 1);

    let dry = supervisor
        .execute_policy("unused_inference", true)
        .await
        .unwrap()
        .unwrap();
    assert!(dry.dry_run);
    assert_eq!(supervisor.policy_history(10).len(), 1);

    let update = PolicyUpdate {
        enabled: Some(false),
        ..Default::default()
    };
    let updated = supervisor.update_policy("unused_inference", &update).unwrap();
    assert!(!updated.enabled);
    assert_eq!(supervisor.policy_status().enabled_policies, 0);

    supervisor.remove_policy("unused_inference").unwrap();
    assert_eq!(supervisor.policy_status().total_policies, 0);
}

#[tokio::test]
async fn lmdb_backed_supervisor_persists_records() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = KelpConfig::default();
    config.storage.lmdb_path = Some(dir.path().join("kelp-db"));
    config.storage.lmdb_max_size_mb = 64;
    let supervisor = Supervisor::open(config).unwrap();

    let compute = CountingCompute::new();
    for _ in 0..2 {
        let request = CacheRequest::prediction("kelp-biomass-v2", json!({"transect": 7}));
        supervisor
            .manager()
            .get_or_compute(request, |id, params| compute.compute(id, params))
            .await
            .unwrap();
    }
    assert_eq!(compute.calls(), 1);

    let stats = supervisor.manager().store_stats().await.unwrap();
    assert_eq!(stats.total_records(), 1);
    let report = supervisor.cleanup_report().await;
    assert_eq!(report.per_type[&CacheType::Inference].live_records, 1);
}
