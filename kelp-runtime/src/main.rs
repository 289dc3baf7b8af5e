//! kelp entry point.
//!
//! Loads configuration, opens the record store and runs the background
//! tasks until Ctrl-C.

use kelp_runtime::{init_tracing, KelpConfig, RuntimeResult, Supervisor};

#[tokio::main]
async fn main() -> RuntimeResult<()> {
    let config = KelpConfig::load()?;
    init_tracing(&config.telemetry)?;

    let supervisor = Supervisor::open(config)?;
    supervisor.start_all()?;
    tracing::info!(tasks = ?supervisor.running_tasks(), "kelp running");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    let exits = supervisor.shutdown().await;
    let stats = supervisor.statistics();
    tracing::info!(
        tasks_stopped = exits.len(),
        hits = stats.hits,
        misses = stats.misses,
        hit_ratio = stats.hit_ratio,
        "kelp stopped"
    );
    Ok(())
}
