//! Kelp Policy - retention policy engine
//!
//! A [`RetentionPolicy`] compiles to an AND of simple comparisons over cache
//! record attributes. The [`RetentionPolicyEngine`] evaluates registered
//! policies in registration order, refuses any run that would touch more than
//! the safety cap, and applies the policy action (delete, archive, compress,
//! migrate) in bounded batches.
//!
//! [`RetentionPolicy`]: kelp_core::RetentionPolicy

pub mod config;
pub mod defaults;
pub mod engine;
pub mod report;
pub mod scheduler;

pub use config::PolicyEngineConfig;
pub use defaults::default_policies;
pub use engine::{PassOutcome, RetentionPolicyEngine};
pub use report::{CleanupReport, PolicyMetricsSnapshot, PolicyStatus, PolicySummary, TypeCleanup};
pub use scheduler::run_scheduler;
