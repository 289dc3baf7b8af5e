//! Retention policies, their compiled predicates and execution records.

use crate::error::ValidationError;
use crate::{
    new_event_id, CacheRecord, CacheType, EventId, PolicyAction, RetentionPriority, Timestamp,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// ============================================================================
// POLICY
// ============================================================================

/// Declarative rule over one cache type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub policy_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub cache_type: CacheType,
    /// Records not accessed for this many days match. 0 disables the age
    /// condition and requires expiry instead.
    pub retention_days: u32,
    /// Records accessed fewer times than this match. 0 disables.
    #[serde(default)]
    pub min_access_count: u64,
    /// Records scoring below this match. 0.0 disables.
    #[serde(default)]
    pub min_quality_score: f64,
    /// Records at or below this priority match.
    #[serde(default)]
    pub priority_threshold: Option<RetentionPriority>,
    pub action: PolicyAction,
    /// Target collection for [`PolicyAction::Migrate`].
    #[serde(default)]
    pub migrate_to: Option<CacheType>,
    /// Only expired or invalidated records match.
    #[serde(default)]
    pub require_expired: bool,
    pub enabled: bool,
    pub execution_interval_hours: u32,
    #[serde(default)]
    pub next_execution: Option<Timestamp>,
    /// Attribute equality filters.
    #[serde(default)]
    pub custom_filters: BTreeMap<String, Value>,
}

impl RetentionPolicy {
    /// Enabled policy with no conditions, running daily.
    pub fn new(
        policy_id: impl Into<String>,
        name: impl Into<String>,
        cache_type: CacheType,
        action: PolicyAction,
    ) -> Self {
        Self {
            policy_id: policy_id.into(),
            name: name.into(),
            description: String::new(),
            cache_type,
            retention_days: 0,
            min_access_count: 0,
            min_quality_score: 0.0,
            priority_threshold: None,
            action,
            migrate_to: None,
            require_expired: false,
            enabled: true,
            execution_interval_hours: 24,
            next_execution: None,
            custom_filters: BTreeMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    pub fn with_min_access_count(mut self, count: u64) -> Self {
        self.min_access_count = count;
        self
    }

    pub fn with_min_quality(mut self, score: f64) -> Self {
        self.min_quality_score = score;
        self
    }

    pub fn with_priority_threshold(mut self, priority: RetentionPriority) -> Self {
        self.priority_threshold = Some(priority);
        self
    }

    pub fn with_interval_hours(mut self, hours: u32) -> Self {
        self.execution_interval_hours = hours;
        self
    }

    pub fn with_filter(mut self, attribute: impl Into<String>, value: Value) -> Self {
        self.custom_filters.insert(attribute.into(), value);
        self
    }

    pub fn migrating_to(mut self, target: CacheType) -> Self {
        self.migrate_to = Some(target);
        self
    }

    pub fn requiring_expiry(mut self) -> Self {
        self.require_expired = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn execution_interval(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.execution_interval_hours))
    }

    /// Enabled and either never scheduled or scheduled at or before `now`.
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.enabled && self.next_execution.map_or(true, |at| at <= now)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.policy_id.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "policy_id".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.min_quality_score) {
            return Err(ValidationError::InvalidValue {
                field: "min_quality_score".to_string(),
                reason: format!("{} is outside [0, 1]", self.min_quality_score),
            });
        }
        if self.execution_interval_hours == 0 {
            return Err(ValidationError::InvalidValue {
                field: "execution_interval_hours".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.action == PolicyAction::Migrate {
            match self.migrate_to {
                None => {
                    return Err(ValidationError::RequiredFieldMissing {
                        field: "migrate_to".to_string(),
                    })
                }
                Some(target) if target == self.cache_type => {
                    return Err(ValidationError::InvalidValue {
                        field: "migrate_to".to_string(),
                        reason: "target must differ from the policy's cache type".to_string(),
                    })
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Compile to the AND of this policy's conditions, evaluated at `now`.
    pub fn predicate(&self, now: Timestamp) -> RecordPredicate {
        let last_accessed_before = (self.retention_days > 0)
            .then(|| now - chrono::Duration::days(i64::from(self.retention_days)));
        RecordPredicate {
            cache_type: self.cache_type,
            last_accessed_before,
            access_count_below: (self.min_access_count > 0).then_some(self.min_access_count),
            quality_below: (self.min_quality_score > 0.0).then_some(self.min_quality_score),
            priority_at_most: self.priority_threshold,
            require_expired: self.require_expired || self.retention_days == 0,
            attribute_equals: self.custom_filters.clone(),
            evaluated_at: now,
        }
    }
}

/// Partial update for a registered policy; `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub retention_days: Option<u32>,
    pub min_access_count: Option<u64>,
    pub min_quality_score: Option<f64>,
    pub priority_threshold: Option<Option<RetentionPriority>>,
    pub action: Option<PolicyAction>,
    pub migrate_to: Option<Option<CacheType>>,
    pub require_expired: Option<bool>,
    pub enabled: Option<bool>,
    pub execution_interval_hours: Option<u32>,
    pub custom_filters: Option<BTreeMap<String, Value>>,
}

impl PolicyUpdate {
    /// Apply onto a copy and validate; the original is untouched on error.
    pub fn apply_to(&self, policy: &RetentionPolicy) -> Result<RetentionPolicy, ValidationError> {
        let mut next = policy.clone();
        if let Some(v) = &self.name {
            next.name = v.clone();
        }
        if let Some(v) = &self.description {
            next.description = v.clone();
        }
        if let Some(v) = self.retention_days {
            next.retention_days = v;
        }
        if let Some(v) = self.min_access_count {
            next.min_access_count = v;
        }
        if let Some(v) = self.min_quality_score {
            next.min_quality_score = v;
        }
        if let Some(v) = self.priority_threshold {
            next.priority_threshold = v;
        }
        if let Some(v) = self.action {
            next.action = v;
        }
        if let Some(v) = self.migrate_to {
            next.migrate_to = v;
        }
        if let Some(v) = self.require_expired {
            next.require_expired = v;
        }
        if let Some(v) = self.enabled {
            next.enabled = v;
        }
        if let Some(v) = self.execution_interval_hours {
            next.execution_interval_hours = v;
        }
        if let Some(v) = &self.custom_filters {
            next.custom_filters = v.clone();
        }
        next.validate()?;
        Ok(next)
    }
}

// ============================================================================
// PREDICATE
// ============================================================================

/// Conjunction of simple comparisons over a [`CacheRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordPredicate {
    pub cache_type: CacheType,
    pub last_accessed_before: Option<Timestamp>,
    pub access_count_below: Option<u64>,
    pub quality_below: Option<f64>,
    pub priority_at_most: Option<RetentionPriority>,
    pub require_expired: bool,
    pub attribute_equals: BTreeMap<String, Value>,
    pub evaluated_at: Timestamp,
}

impl RecordPredicate {
    pub fn matches(&self, record: &CacheRecord) -> bool {
        if record.cache_type != self.cache_type {
            return false;
        }
        if let Some(cutoff) = self.last_accessed_before {
            if record.last_accessed_at >= cutoff {
                return false;
            }
        }
        if let Some(min) = self.access_count_below {
            if record.access_count >= min {
                return false;
            }
        }
        if let Some(min) = self.quality_below {
            if record.quality_score >= min {
                return false;
            }
        }
        if let Some(max) = self.priority_at_most {
            if record.priority > max {
                return false;
            }
        }
        if self.require_expired && record.is_fresh(self.evaluated_at) {
            return false;
        }
        self.attribute_equals
            .iter()
            .all(|(attr, expected)| record.attributes.get(attr) == Some(expected))
    }
}

// ============================================================================
// EXECUTION RECORD
// ============================================================================

/// Audit entry for one policy run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyExecutionRecord {
    pub execution_id: EventId,
    pub policy_id: String,
    pub executed_at: Timestamp,
    pub records_matched: u64,
    pub records_affected: u64,
    pub space_freed_estimate_bytes: u64,
    pub duration_ms: u64,
    pub dry_run: bool,
    pub success: bool,
    pub error: Option<String>,
}

impl PolicyExecutionRecord {
    pub fn started(policy_id: impl Into<String>, executed_at: Timestamp, dry_run: bool) -> Self {
        Self {
            execution_id: new_event_id(),
            policy_id: policy_id.into(),
            executed_at,
            records_matched: 0,
            records_affected: 0,
            space_freed_estimate_bytes: 0,
            duration_ms: 0,
            dry_run,
            success: true,
            error: None,
        }
    }

    pub fn fail(mut self, error: impl ToString) -> Self {
        self.success = false;
        self.error = Some(error.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CacheKey;
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;

    fn record(now: Timestamp, quality: f64, accessed_days_ago: i64, count: u64) -> CacheRecord {
        let mut rec = CacheRecord::new(
            CacheKey::derive(CacheType::Feature, "r", &json!({"q": quality})),
            CacheType::Feature,
            "r",
            json!({"a": 1}),
            quality,
            90,
            Duration::from_secs(3600),
            now - chrono::Duration::days(accessed_days_ago),
        );
        rec.access_count = count;
        rec
    }

    #[test]
    fn test_predicate_ands_conditions() {
        let now = Utc::now();
        let policy = RetentionPolicy::new("p", "p", CacheType::Feature, PolicyAction::Delete)
            .with_retention_days(90)
            .with_min_access_count(2)
            .with_min_quality(0.3);
        let pred = policy.predicate(now);

        assert!(pred.matches(&record(now, 0.1, 100, 1)));
        // Recently accessed
        assert!(!pred.matches(&record(now, 0.1, 10, 1)));
        // Accessed often enough
        assert!(!pred.matches(&record(now, 0.1, 100, 5)));
        // Good quality
        assert!(!pred.matches(&record(now, 0.9, 100, 1)));
    }

    #[test]
    fn test_zero_retention_requires_expiry() {
        let now = Utc::now();
        let policy = RetentionPolicy::new("ic", "ic", CacheType::Feature, PolicyAction::Delete);
        let pred = policy.predicate(now);
        assert!(pred.require_expired);

        let fresh = record(now, 0.5, 0, 1);
        assert!(!pred.matches(&fresh));

        let mut invalidated = fresh.clone();
        invalidated.is_valid = false;
        assert!(pred.matches(&invalidated));
    }

    #[test]
    fn test_priority_threshold_matches_at_or_below() {
        let now = Utc::now();
        let pred = RetentionPolicy::new("p", "p", CacheType::Feature, PolicyAction::Archive)
            .with_retention_days(1)
            .with_priority_threshold(RetentionPriority::Normal)
            .predicate(now);
        assert!(pred.matches(&record(now, 0.2, 5, 1)));
        assert!(pred.matches(&record(now, 0.6, 5, 1)));
        assert!(!pred.matches(&record(now, 0.8, 5, 1)));
    }

    #[test]
    fn test_custom_filters_use_equality() {
        let now = Utc::now();
        let pred = RetentionPolicy::new("p", "p", CacheType::Feature, PolicyAction::Archive)
            .with_retention_days(1)
            .with_filter("time_window", json!("seasonal"))
            .predicate(now);
        let mut rec = record(now, 0.5, 5, 1);
        assert!(!pred.matches(&rec));
        rec.attributes.insert("time_window".to_string(), json!("seasonal"));
        assert!(pred.matches(&rec));
    }

    #[test]
    fn test_migrate_requires_distinct_target() {
        let base = RetentionPolicy::new("m", "m", CacheType::Inference, PolicyAction::Migrate);
        assert!(base.validate().is_err());
        assert!(base.clone().migrating_to(CacheType::Inference).validate().is_err());
        assert!(base.migrating_to(CacheType::AggregatedSeries).validate().is_ok());
    }

    #[test]
    fn test_update_is_validated_before_apply() {
        let policy = RetentionPolicy::new("p", "p", CacheType::Feature, PolicyAction::Delete);
        let bad = PolicyUpdate {
            min_quality_score: Some(3.0),
            ..PolicyUpdate::default()
        };
        assert!(bad.apply_to(&policy).is_err());

        let good = PolicyUpdate {
            enabled: Some(false),
            retention_days: Some(30),
            ..PolicyUpdate::default()
        };
        let next = good.apply_to(&policy).unwrap();
        assert!(!next.enabled);
        assert_eq!(next.retention_days, 30);
    }

    #[test]
    fn test_due_when_never_scheduled() {
        let now = Utc::now();
        let mut policy = RetentionPolicy::new("p", "p", CacheType::Feature, PolicyAction::Delete);
        assert!(policy.is_due(now));
        policy.next_execution = Some(now + chrono::Duration::hours(1));
        assert!(!policy.is_due(now));
        policy.next_execution = Some(now);
        assert!(!policy.disabled().is_due(now));
    }
}
