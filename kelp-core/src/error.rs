//! Error types for kelp operations

use crate::{CacheType, PolicyAction};
use std::time::Duration;
use thiserror::Error;

/// Persistent-store and cache-tier errors.
///
/// None of these reach callers of get-or-compute; the retention manager
/// absorbs them and falls back to computing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Persistent store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Store operation {operation} timed out after {elapsed:?}")]
    Timeout {
        operation: &'static str,
        elapsed: Duration,
    },

    #[error("Serialization failed for {cache_type} record: {reason}")]
    Serialization { cache_type: CacheType, reason: String },

    #[error("Cache lock poisoned")]
    LockPoisoned,

    #[error("Unsupported batch action {action} on {cache_type}: {reason}")]
    UnsupportedAction {
        action: PolicyAction,
        cache_type: CacheType,
        reason: String,
    },

    #[error("Backend error: {reason}")]
    Backend { reason: String },
}

/// Validation errors for user-supplied objects.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Duplicate id: {id}")]
    DuplicateId { id: String },

    #[error("Not found: {kind} {id}")]
    NotFound { kind: &'static str, id: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config file {path}: {reason}")]
    Parse { path: String, reason: String },
}

/// Retention policy execution errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Policy {policy_id} would affect {matched} records, safety cap is {cap}")]
    SafetyBreach {
        policy_id: String,
        matched: u64,
        cap: u64,
    },

    #[error("Policy {policy_id} aborted: {reason}")]
    Aborted { policy_id: String, reason: String },
}

/// Feature pipeline errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Pipeline queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("Pipeline queue is closed")]
    QueueClosed,

    #[error("Malformed record {target_id}: {reason}")]
    MalformedRecord { target_id: String, reason: String },

    #[error("Extractor {extractor} failed for {target_id}: {reason}")]
    ExtractionFailed {
        extractor: String,
        target_id: String,
        reason: String,
    },
}

/// Integration (wrapper install/restore) errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IntegrationError {
    #[error("Failed to install wrapper for {target}: {reason}")]
    WrapFailed { target: String, reason: String },

    #[error("Failed to restore original for {target}: {reason}")]
    RestoreFailed { target: String, reason: String },

    #[error("Integration already enabled")]
    AlreadyEnabled,

    #[error("Integration not enabled")]
    NotEnabled,
}

/// Master error type for all kelp errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KelpError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Integration error: {0}")]
    Integration(#[from] IntegrationError),
}

/// Result type alias for kelp operations.
pub type KelpResult<T> = Result<T, KelpError>;

impl KelpError {
    /// True for errors that mean "the persistent tier could not answer".
    pub fn is_store_unavailable(&self) -> bool {
        matches!(
            self,
            KelpError::Storage(StorageError::Unavailable { .. })
                | KelpError::Storage(StorageError::Timeout { .. })
        )
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safety_breach_display() {
        let err = PolicyError::SafetyBreach {
            policy_id: "fs_low_quality".to_string(),
            matched: 5000,
            cap: 1000,
        };
        let msg = err.to_string();
        assert!(msg.contains("fs_low_quality"));
        assert!(msg.contains("5000"));
        assert!(msg.contains("1000"));
    }

    #[test]
    fn test_timeout_display() {
        let err = StorageError::Timeout {
            operation: "get",
            elapsed: Duration::from_millis(250),
        };
        assert!(err.to_string().contains("get"));
        assert!(err.to_string().contains("250ms"));
    }

    #[test]
    fn test_kelp_error_from_variants() {
        let storage = KelpError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, KelpError::Storage(_)));

        let pipeline = KelpError::from(PipelineError::QueueClosed);
        assert!(matches!(pipeline, KelpError::Pipeline(_)));

        let integration = KelpError::from(IntegrationError::AlreadyEnabled);
        assert!(matches!(integration, KelpError::Integration(_)));

        let config = KelpError::from(ConfigError::MissingRequired {
            field: "store.path".to_string(),
        });
        assert!(matches!(config, KelpError::Config(_)));
    }

    #[test]
    fn test_store_unavailable_classification() {
        let down = KelpError::from(StorageError::Unavailable {
            reason: "connection refused".to_string(),
        });
        assert!(down.is_store_unavailable());

        let slow = KelpError::from(StorageError::Timeout {
            operation: "put",
            elapsed: Duration::from_secs(2),
        });
        assert!(slow.is_store_unavailable());

        let poisoned = KelpError::from(StorageError::LockPoisoned);
        assert!(!poisoned.is_store_unavailable());
    }
}
