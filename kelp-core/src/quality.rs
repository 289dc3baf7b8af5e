//! Payload quality scoring.
//!
//! Quality is the share of populated top-level fields, scaled by the cache
//! type multiplier and, for feature records, the feature-kind multiplier,
//! then clamped to `[0, 1]`. It only decides default retention length.

use crate::{CacheType, FeatureKind, QualityWeights};
use serde_json::Value;

/// Fraction of populated entries in a payload.
///
/// Objects count populated fields, arrays count populated elements, scalars
/// are complete unless null or an empty string. Empty containers score 0.
pub fn completeness(payload: &Value) -> f64 {
    match payload {
        Value::Object(map) => {
            if map.is_empty() {
                return 0.0;
            }
            let populated = map.values().filter(|v| is_populated(v)).count();
            populated as f64 / map.len() as f64
        }
        Value::Array(items) => {
            if items.is_empty() {
                return 0.0;
            }
            let populated = items.iter().filter(|v| is_populated(v)).count();
            populated as f64 / items.len() as f64
        }
        other => {
            if is_populated(other) {
                1.0
            } else {
                0.0
            }
        }
    }
}

fn is_populated(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

/// Score a payload for a cache type and optional feature family.
pub fn quality_score(
    payload: &Value,
    cache_type: CacheType,
    feature_kind: Option<FeatureKind>,
    weights: &QualityWeights,
) -> f64 {
    let kind_multiplier = feature_kind.map_or(1.0, |k| k.quality_multiplier());
    let raw = completeness(payload) * weights.multiplier(cache_type) * kind_multiplier;
    if raw.is_finite() {
        raw.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RetentionPriority;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_completeness_counts_populated_fields() {
        let payload = json!({"a": 1, "b": null, "c": "", "d": "x"});
        assert!((completeness(&payload) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_empty_payloads_score_zero() {
        assert_eq!(completeness(&json!({})), 0.0);
        assert_eq!(completeness(&json!([])), 0.0);
        assert_eq!(completeness(&Value::Null), 0.0);
    }

    #[test]
    fn test_species_multiplier_clamped() {
        let payload = json!({"species_count": 4, "richness": 3});
        let score = quality_score(
            &payload,
            CacheType::Feature,
            Some(FeatureKind::Species),
            &QualityWeights::default(),
        );
        assert_eq!(score, 1.0);
    }

    #[test]
    fn test_high_quality_payload_is_critical() {
        // 19 of 20 fields populated.
        let mut map = serde_json::Map::new();
        for i in 0..19 {
            map.insert(format!("f{i}"), json!(i));
        }
        map.insert("missing".to_string(), Value::Null);
        let score = quality_score(
            &Value::Object(map),
            CacheType::Inference,
            None,
            &QualityWeights::default(),
        );
        assert!((score - 0.95).abs() < 1e-9);
        assert_eq!(RetentionPriority::from_quality_score(score), RetentionPriority::Critical);
    }

    proptest! {
        #[test]
        fn prop_priority_monotonic(a in 0.0f64..=1.0, b in 0.0f64..=1.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(
                RetentionPriority::from_quality_score(lo) <= RetentionPriority::from_quality_score(hi)
            );
        }

        #[test]
        fn prop_score_in_unit_interval(fields in proptest::collection::vec(proptest::option::of(any::<i32>()), 0..12)) {
            let map: serde_json::Map<String, Value> = fields
                .into_iter()
                .enumerate()
                .map(|(i, v)| (format!("k{i}"), v.map_or(Value::Null, |n| json!(n))))
                .collect();
            let score = quality_score(&Value::Object(map), CacheType::Feature, Some(FeatureKind::Environmental), &QualityWeights::default());
            prop_assert!((0.0..=1.0).contains(&score));
        }
    }
}
