//! Kelp Runtime - configuration and supervision
//!
//! [`KelpConfig`] gathers every component's configuration from defaults, an
//! optional TOML file and `KELP_*` environment variables. [`Supervisor`]
//! builds the components over one persistent store, runs the pipeline
//! worker, policy scheduler and monitor sampler, and exposes the admin
//! operations.

pub mod config;
pub mod error;
pub mod supervisor;
pub mod telemetry;

pub use config::{KelpConfig, LogFormat, StorageConfig, TelemetryConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use supervisor::{BackgroundTask, Supervisor, SystemHealth, TaskExit};
pub use telemetry::init_tracing;
