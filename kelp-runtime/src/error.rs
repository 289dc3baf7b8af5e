//! Errors surfaced by the runtime and the binary.

use kelp_core::{ConfigError, KelpError};
use kelp_storage::LmdbStoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    #[error("Store error: {0}")]
    Store(#[from] LmdbStoreError),

    #[error(transparent)]
    Kelp(#[from] KelpError),

    #[error("Signal handling failed: {0}")]
    Signal(#[from] std::io::Error),

    #[error("Background task {task} ended abnormally: {reason}")]
    Task { task: &'static str, reason: String },
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
