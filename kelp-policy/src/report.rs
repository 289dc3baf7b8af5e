//! Status and cleanup report shapes returned by the engine.

use std::collections::BTreeMap;

use kelp_core::{CacheType, PolicyAction, PolicyExecutionRecord, RetentionPolicy, Timestamp};
use serde::{Deserialize, Serialize};

/// Lifetime counters of the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyMetricsSnapshot {
    pub runs: u64,
    pub runs_failed: u64,
    pub safety_breaches: u64,
    pub overlaps_skipped: u64,
    pub records_affected: u64,
    pub bytes_freed: u64,
    pub last_cleanup: Option<Timestamp>,
}

/// One policy as listed by the status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySummary {
    pub policy_id: String,
    pub name: String,
    pub enabled: bool,
    pub cache_type: CacheType,
    pub action: PolicyAction,
    pub retention_days: u32,
    pub execution_interval_hours: u32,
    pub next_execution: Option<Timestamp>,
}

impl From<&RetentionPolicy> for PolicySummary {
    fn from(p: &RetentionPolicy) -> Self {
        Self {
            policy_id: p.policy_id.clone(),
            name: p.name.clone(),
            enabled: p.enabled,
            cache_type: p.cache_type,
            action: p.action,
            retention_days: p.retention_days,
            execution_interval_hours: p.execution_interval_hours,
            next_execution: p.next_execution,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyStatus {
    pub total_policies: usize,
    pub enabled_policies: usize,
    pub scheduler_running: bool,
    pub policies: Vec<PolicySummary>,
    pub metrics: PolicyMetricsSnapshot,
}

/// Per cache type section of a cleanup report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeCleanup {
    pub policies: usize,
    pub live_records: u64,
    pub live_bytes: u64,
    pub records_cleaned: u64,
    pub bytes_freed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub generated_at: Timestamp,
    pub total_policies: usize,
    pub total_executions: usize,
    pub total_records_cleaned: u64,
    pub total_bytes_freed: u64,
    pub last_cleanup: Option<Timestamp>,
    pub archived_records: u64,
    pub per_type: BTreeMap<CacheType, TypeCleanup>,
    pub recent_executions: Vec<PolicyExecutionRecord>,
}
