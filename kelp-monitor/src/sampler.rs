//! Background sampling loop.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::monitor::PerformanceMonitor;
use crate::report::MonitorMetricsSnapshot;

/// Sample every `sample_interval` until `shutdown_rx` flips to true.
pub async fn run_sampler(
    monitor: Arc<PerformanceMonitor>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> MonitorMetricsSnapshot {
    let period = monitor.config().sample_interval;
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    monitor.set_sampler_running(true);
    tracing::info!(interval_secs = period.as_secs(), "Performance sampler started");

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
                match monitor.sample_once().await {
                    Ok(raised) if !raised.is_empty() => {
                        tracing::debug!(alerts = raised.len(), "Sample raised alerts");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "Sampling pass failed"),
                }
            }
        }
    }

    monitor.set_sampler_running(false);
    let snapshot = monitor.metrics();
    tracing::info!(
        samples = snapshot.samples_recorded,
        alerts = snapshot.alerts_raised,
        "Performance sampler stopped"
    );
    snapshot
}
