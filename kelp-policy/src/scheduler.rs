//! Background scheduler for due policies.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::engine::RetentionPolicyEngine;
use crate::report::PolicyMetricsSnapshot;

/// Run due policies every `scheduler_tick` until `shutdown_rx` flips to true.
///
/// A pass that hit store failures is retried after `error_backoff` instead of
/// waiting for the next tick. Shutdown during a run stops it after the batch
/// in flight.
pub async fn run_scheduler(
    engine: Arc<RetentionPolicyEngine>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> PolicyMetricsSnapshot {
    let config = engine.config().clone();
    let mut tick = interval(config.scheduler_tick);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    engine.set_scheduler_running(true);
    tracing::info!(
        tick_secs = config.scheduler_tick.as_secs(),
        dry_run = config.dry_run,
        "Policy scheduler started"
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
            _ = tick.tick() => {
                let mut pass = engine.execute_due_inner(config.dry_run, Some(&shutdown_rx)).await;
                while pass.store_failures > 0 && !*shutdown_rx.borrow() {
                    tracing::warn!(
                        store_failures = pass.store_failures,
                        backoff_secs = engine.error_backoff().as_secs(),
                        "Policy pass hit store failures, backing off"
                    );
                    tokio::select! {
                        _ = shutdown_rx.changed() => break,
                        _ = tokio::time::sleep(engine.error_backoff()) => {}
                    }
                    pass = engine.execute_due_inner(config.dry_run, Some(&shutdown_rx)).await;
                }
                let succeeded = pass.executions.iter().filter(|r| r.success).count();
                if !pass.executions.is_empty() {
                    tracing::info!(
                        executed = pass.executions.len(),
                        succeeded,
                        "Policy pass completed"
                    );
                } else {
                    tracing::trace!("Policy pass found nothing due");
                }
            }
        }
    }

    engine.set_scheduler_running(false);
    let snapshot = engine.metrics();
    tracing::info!(
        runs = snapshot.runs,
        runs_failed = snapshot.runs_failed,
        records_affected = snapshot.records_affected,
        "Policy scheduler stopped"
    );
    snapshot
}
