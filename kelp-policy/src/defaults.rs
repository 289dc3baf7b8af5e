//! Default policy set.

use kelp_core::{CacheType, PolicyAction, RetentionPolicy, RetentionPriority};
use serde_json::json;

/// Policies registered when the engine starts with `load_defaults`.
pub fn default_policies() -> Vec<RetentionPolicy> {
    vec![
        RetentionPolicy::new(
            "fs_high_quality",
            "High Quality Features",
            CacheType::Feature,
            PolicyAction::Delete,
        )
        .with_description("Keep high quality features for two years")
        .with_retention_days(730)
        .with_min_access_count(5)
        .with_min_quality(0.8)
        .with_priority_threshold(RetentionPriority::High)
        .with_interval_hours(24),
        RetentionPolicy::new(
            "fs_medium_quality",
            "Medium Quality Features",
            CacheType::Feature,
            PolicyAction::Delete,
        )
        .with_description("Keep medium quality features for one year")
        .with_retention_days(365)
        .with_min_access_count(2)
        .with_min_quality(0.6)
        .with_priority_threshold(RetentionPriority::Normal)
        .with_interval_hours(24),
        RetentionPolicy::new(
            "fs_low_quality",
            "Low Quality Features",
            CacheType::Feature,
            PolicyAction::Delete,
        )
        .with_description("Drop low quality features after three months")
        .with_retention_days(90)
        .with_min_access_count(1)
        .with_min_quality(0.3)
        .with_priority_threshold(RetentionPriority::Low)
        .with_interval_hours(12),
        RetentionPolicy::new(
            "tc_frequent",
            "Frequent Training Cache",
            CacheType::Training,
            PolicyAction::Delete,
        )
        .with_description("Training sets unused for six months")
        .with_retention_days(180)
        .with_min_access_count(10)
        .with_interval_hours(48),
        RetentionPolicy::new(
            "tc_occasional",
            "Occasional Training Cache",
            CacheType::Training,
            PolicyAction::Delete,
        )
        .with_description("Rarely used training sets after three months")
        .with_retention_days(90)
        .with_min_access_count(3)
        .with_interval_hours(24),
        RetentionPolicy::new(
            "ic_expired",
            "Expired Inference Cache",
            CacheType::Inference,
            PolicyAction::Delete,
        )
        .with_description("Predictions past their TTL")
        .requiring_expiry()
        .with_interval_hours(6),
        RetentionPolicy::new(
            "ic_old_unused",
            "Old Unused Inference Cache",
            CacheType::Inference,
            PolicyAction::Delete,
        )
        .with_description("Expired predictions unused for a week")
        .with_retention_days(7)
        .requiring_expiry()
        .with_interval_hours(12),
        RetentionPolicy::new(
            "as_seasonal",
            "Seasonal Aggregations",
            CacheType::AggregatedSeries,
            PolicyAction::Archive,
        )
        .with_description("Archive seasonal aggregates after five years")
        .with_retention_days(1825)
        .with_min_access_count(1)
        .with_filter("time_window", json!("seasonal"))
        .with_interval_hours(168),
    ]
}
