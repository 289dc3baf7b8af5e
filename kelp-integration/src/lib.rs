//! Kelp Integration - caching over existing ML entry points
//!
//! ML code calls its predict, training-preparation, feature and
//! record-retrieval functions through [`FunctionSlot`]s. Enabling the
//! [`IntegrationLayer`] swaps each slot's implementation for a decorator
//! that answers through the retention manager; disabling it puts the exact
//! original functions back. Call sites never change.

pub mod config;
pub mod decorators;
pub mod function;
pub mod layer;

pub use config::IntegrationConfig;
pub use decorators::{CachedCall, KeySpec, RecordRetrieval};
pub use function::{ml_fn, CallError, CallResult, FnFunction, FunctionSlot, MlEndpoints, MlFunction};
pub use layer::{IntegrationLayer, IntegrationMetricsSnapshot, RestoreReport};
