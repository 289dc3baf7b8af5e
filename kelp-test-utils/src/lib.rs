//! Kelp Test Utilities
//!
//! Shared test infrastructure for the kelp workspace:
//! - Proptest generators for core types and domain payloads
//! - Fixtures for cache records, policies and domain records
//! - A counting compute function for asserting cache hits
//! - Assertions for kelp error variants

pub use kelp_core::{
    CacheKey, CacheRecord, CacheType, FeatureKind, KelpError, KelpResult, PolicyAction,
    RetentionPolicy, RetentionPriority, Timestamp,
};

use chrono::Utc;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for kelp types.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_cache_type() -> impl Strategy<Value = CacheType> {
        prop_oneof![
            Just(CacheType::Feature),
            Just(CacheType::Training),
            Just(CacheType::Inference),
            Just(CacheType::AggregatedSeries),
        ]
    }

    pub fn arb_feature_kind() -> impl Strategy<Value = FeatureKind> {
        prop_oneof![
            Just(FeatureKind::Temporal),
            Just(FeatureKind::Spatial),
            Just(FeatureKind::Environmental),
            Just(FeatureKind::Species),
        ]
    }

    /// Logical ids shaped like station, model or record identifiers.
    pub fn arb_logical_id() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_-]{0,23}"
    }

    /// Flat JSON objects of scalar parameters.
    pub fn arb_params() -> impl Strategy<Value = Value> {
        let scalar = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(|n| json!(n)),
            (-1000.0f64..1000.0).prop_map(|f| json!(f)),
            "[a-z]{0,8}".prop_map(Value::String),
        ];
        prop::collection::btree_map("[a-z_]{1,10}", scalar, 0..6)
            .prop_map(|m| Value::Object(m.into_iter().collect()))
    }

    /// Timestamps between 2020 and 2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
        })
    }

    /// Raw "record submitted" payloads off the Angolan coast.
    pub fn arb_domain_record_json() -> impl Strategy<Value = Value> {
        (
            arb_logical_id(),
            -18.0f64..-4.0,
            8.0f64..14.0,
            arb_timestamp(),
            proptest::option::of(10.0f64..30.0),
            prop::collection::vec("[A-Z][a-z]{3,8} [a-z]{3,8}", 0..5),
        )
            .prop_map(|(id, lat, lon, ts, temp, species)| {
                json!({
                    "record_id": id,
                    "latitude": lat,
                    "longitude": lon,
                    "observed_at": ts.to_rfc3339(),
                    "environment": temp.map(|t| json!({"temperature": t})),
                    "species": species
                        .into_iter()
                        .map(|name| json!({"name": name, "count": 3}))
                        .collect::<Vec<_>>(),
                })
            })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Ready-made records and policies.

    use super::*;

    /// A record last accessed `days_ago` days before now.
    pub fn aged_record(
        cache_type: CacheType,
        logical_id: &str,
        quality: f64,
        days_ago: i64,
        access_count: u64,
    ) -> CacheRecord {
        let created = Utc::now() - chrono::Duration::days(days_ago);
        let mut record = CacheRecord::new(
            CacheKey::derive(cache_type, logical_id, &json!({})),
            cache_type,
            logical_id,
            json!({"id": logical_id, "value": quality}),
            quality,
            90,
            Duration::from_secs(24 * 3600),
            created,
        );
        record.access_count = access_count;
        record
    }

    /// `count` stale, rarely used, low-quality feature records.
    pub fn stale_feature_records(count: usize) -> Vec<CacheRecord> {
        (0..count)
            .map(|i| aged_record(CacheType::Feature, &format!("stale-{i}"), 0.2, 120, 0))
            .collect()
    }

    /// Deletes feature records unused for 90 days with quality under 0.3.
    pub fn low_quality_feature_policy() -> RetentionPolicy {
        RetentionPolicy::new(
            "test_low_quality",
            "Low quality features",
            CacheType::Feature,
            PolicyAction::Delete,
        )
        .with_retention_days(90)
        .with_min_quality(0.3)
        .with_interval_hours(12)
    }

    /// A well-formed "record submitted" payload.
    pub fn domain_record_json(record_id: &str) -> Value {
        json!({
            "record_id": record_id,
            "latitude": -12.58,
            "longitude": 13.41,
            "depth_min": 5.0,
            "depth_max": 250.0,
            "area_km2": 12.5,
            "observed_at": "2024-07-14T08:30:00Z",
            "ended_at": "2024-07-20T16:00:00Z",
            "environment": {
                "temperature": 17.2,
                "salinity": 35.1,
                "chlorophyll": 3.4,
                "oxygen": 5.6,
                "ph": 8.1
            },
            "species": [
                {"name": "Sardinella aurita", "count": 120, "commercial": true},
                {"name": "Trachurus capensis", "count": 40, "commercial": true},
                {"name": "Cymbium marmoratum", "count": 2, "endemic": true, "conservation_status": "VU"}
            ]
        })
    }
}

// ============================================================================
// COUNTING COMPUTE
// ============================================================================

/// A compute function that counts its invocations.
#[derive(Debug, Clone, Default)]
pub struct CountingCompute {
    calls: Arc<AtomicUsize>,
}

impl CountingCompute {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Deterministic artifact derived from the inputs.
    pub async fn compute(&self, logical_id: String, params: Value) -> Result<Value, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({"logical_id": logical_id, "params": params, "score": 0.87}))
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for kelp error variants.

    use super::*;
    use kelp_core::PipelineError;

    pub fn assert_store_unavailable<T: std::fmt::Debug>(result: &KelpResult<T>) {
        match result {
            Err(e) if e.is_store_unavailable() => {}
            other => panic!("expected store unavailable, got {other:?}"),
        }
    }

    pub fn assert_queue_full<T: std::fmt::Debug>(result: &KelpResult<T>) {
        assert!(
            matches!(result, Err(KelpError::Pipeline(PipelineError::QueueFull { .. }))),
            "expected queue full, got {result:?}"
        );
    }

    pub fn assert_unit_interval(value: f64) {
        assert!(
            (0.0..=1.0).contains(&value),
            "expected value in [0, 1], got {value}"
        );
    }
}
