//! Kelp Core - shared vocabulary
//!
//! Data types, key derivation and scoring rules used by every kelp crate.
//! Nothing in here performs I/O; storage, scheduling and monitoring live in
//! their own crates and depend on this one.

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub mod config;
pub mod enums;
pub mod error;
pub mod health;
pub mod key;
pub mod metrics;
pub mod policy;
pub mod quality;
pub mod record;
pub mod task;

pub use config::{env_bool, env_parse, env_secs, QualityWeights, RetentionTiers, TtlConfig};
pub use enums::{
    AlertLevel, CacheMode, CacheType, EnumParseError, FeatureKind, MetricType, PolicyAction,
    RetentionPriority, Trend,
};
pub use error::{
    ConfigError, IntegrationError, KelpError, KelpResult, PipelineError, PolicyError,
    StorageError, ValidationError,
};
pub use health::{HealthCheck, HealthStatus};
pub use key::{canonical_json, CacheKey};
pub use metrics::{PerformanceAlert, PerformanceMetric};
pub use policy::{PolicyExecutionRecord, PolicyUpdate, RecordPredicate, RetentionPolicy};
pub use quality::{completeness, quality_score};
pub use record::{CacheRecord, Payload};
pub use task::{PipelineTask, TaskType};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Identifier for alerts, tasks and execution records (UUIDv7, time-sortable).
pub type EventId = Uuid;

/// Generate a new UUIDv7 identifier.
pub fn new_event_id() -> EventId {
    Uuid::now_v7()
}
