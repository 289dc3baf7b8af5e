//! Tracing subscriber setup for the kelp binary.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, TelemetryConfig};
use crate::error::{RuntimeError, RuntimeResult};

/// Install the global subscriber. `RUST_LOG` wins over the configured filter.
///
/// Call once at startup; a second call fails.
pub fn init_tracing(config: &TelemetryConfig) -> RuntimeResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|e| RuntimeError::Telemetry(format!("invalid filter {:?}: {}", config.filter, e)))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    installed.map_err(|e| RuntimeError::Telemetry(format!("failed to init subscriber: {e}")))?;

    tracing::info!(
        log_format = ?config.log_format,
        filter = %config.filter,
        "Telemetry initialized"
    );
    Ok(())
}
