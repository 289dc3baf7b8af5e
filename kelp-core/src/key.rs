//! Stable cache key derivation.
//!
//! A key is the first 32 hex characters of
//! `SHA-256("{cache_type}:{logical_id}:{canonical params}")`. Parameters are
//! rendered with object keys sorted at every depth, so two `Value`s that
//! compare equal always produce the same key regardless of insertion order.

use crate::error::ValidationError;
use crate::CacheType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Derived identity of a cached artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Number of hex characters kept from the digest.
    pub const LEN: usize = 32;

    /// Derive the key for a logical identity and its parameters.
    pub fn derive(cache_type: CacheType, logical_id: &str, params: &Value) -> Self {
        let material = format!(
            "{}:{}:{}",
            cache_type.as_str(),
            logical_id,
            canonical_json(params)
        );
        let digest = Sha256::digest(material.as_bytes());
        let mut encoded = hex::encode(digest);
        encoded.truncate(Self::LEN);
        CacheKey(encoded)
    }

    /// Rebuild a key read back from storage.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let valid = raw.len() == Self::LEN
            && raw
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        if !valid {
            return Err(ValidationError::InvalidValue {
                field: "cache_key".to_string(),
                reason: format!("expected {} lowercase hex characters", Self::LEN),
            });
        }
        Ok(CacheKey(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Render a JSON value with object keys sorted recursively.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_key_is_32_hex_chars() {
        let key = CacheKey::derive(CacheType::Inference, "model-a", &json!({"x": 1}));
        assert_eq!(key.as_str().len(), CacheKey::LEN);
        assert!(CacheKey::parse(key.as_str()).is_ok());
    }

    #[test]
    fn test_key_ignores_param_order() {
        let a = json!({"lat": -12.5, "lon": 13.4, "nested": {"b": 2, "a": 1}});
        let b = json!({"nested": {"a": 1, "b": 2}, "lon": 13.4, "lat": -12.5});
        assert_eq!(
            CacheKey::derive(CacheType::Feature, "rec-1", &a),
            CacheKey::derive(CacheType::Feature, "rec-1", &b)
        );
    }

    #[test]
    fn test_key_separates_cache_types() {
        let params = json!({});
        assert_ne!(
            CacheKey::derive(CacheType::Feature, "rec-1", &params),
            CacheKey::derive(CacheType::Inference, "rec-1", &params)
        );
    }

    #[test]
    fn test_array_order_is_significant() {
        assert_ne!(
            CacheKey::derive(CacheType::Training, "t", &json!([1, 2])),
            CacheKey::derive(CacheType::Training, "t", &json!([2, 1]))
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(CacheKey::parse("not-a-key").is_err());
        assert!(CacheKey::parse(&"A".repeat(32)).is_err());
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        assert_eq!(canonical_json(&json!({"b": 1, "a": [true, null]})), r#"{"a":[true,null],"b":1}"#);
    }

    proptest! {
        #[test]
        fn prop_derivation_is_idempotent(id in "[a-z0-9_-]{1,24}", n in any::<i64>(), s in ".{0,16}") {
            let params = json!({"n": n, "s": s});
            let first = CacheKey::derive(CacheType::Feature, &id, &params);
            let second = CacheKey::derive(CacheType::Feature, &id, &params.clone());
            prop_assert_eq!(first, second);
        }
    }
}
