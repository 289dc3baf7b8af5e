//! Cached artifact records.

use crate::{CacheKey, CacheType, FeatureKind, RetentionPriority, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Stored form of a cached value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "encoding", rename_all = "lowercase")]
pub enum Payload {
    /// Plain JSON value.
    Inline { value: Value },
    /// zstd-compressed JSON bytes, written by the compress retention action.
    Compressed {
        #[serde(with = "hex_bytes")]
        bytes: Vec<u8>,
        original_size: u64,
    },
}

impl Payload {
    pub fn inline(value: Value) -> Self {
        Payload::Inline { value }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, Payload::Compressed { .. })
    }

    /// Bytes this payload occupies at rest.
    pub fn stored_size(&self) -> u64 {
        match self {
            Payload::Inline { value } => value.to_string().len() as u64,
            Payload::Compressed { bytes, .. } => bytes.len() as u64,
        }
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(d)?;
        hex::decode(raw).map_err(serde::de::Error::custom)
    }
}

/// One cached artifact with its retention bookkeeping.
///
/// Only the retention manager creates records; retention policies delete,
/// archive, compress or migrate them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub cache_key: CacheKey,
    pub cache_type: CacheType,
    pub logical_id: String,
    pub payload: Payload,
    pub quality_score: f64,
    pub priority: RetentionPriority,
    pub feature_kind: Option<FeatureKind>,
    pub created_at: Timestamp,
    pub last_accessed_at: Timestamp,
    pub access_count: u64,
    pub retention_days: u32,
    /// End of the validity window; the record is stale afterwards.
    pub expires_at: Timestamp,
    pub is_valid: bool,
    /// Free-form attributes matched by policy custom filters.
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    pub size_bytes: u64,
}

impl CacheRecord {
    /// Build a freshly computed record. Access count starts at 1 (the
    /// computing call itself).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cache_key: CacheKey,
        cache_type: CacheType,
        logical_id: impl Into<String>,
        value: Value,
        quality_score: f64,
        retention_days: u32,
        ttl: Duration,
        now: Timestamp,
    ) -> Self {
        let payload = Payload::inline(value);
        let size_bytes = payload.stored_size();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            cache_key,
            cache_type,
            logical_id: logical_id.into(),
            payload,
            quality_score,
            priority: RetentionPriority::from_quality_score(quality_score),
            feature_kind: None,
            created_at: now,
            last_accessed_at: now,
            access_count: 1,
            retention_days,
            expires_at: now.checked_add_signed(ttl).unwrap_or(Timestamp::MAX_UTC),
            is_valid: true,
            attributes: BTreeMap::new(),
            size_bytes,
        }
    }

    pub fn with_feature_kind(mut self, kind: Option<FeatureKind>) -> Self {
        self.feature_kind = kind;
        self
    }

    pub fn with_attributes(mut self, attributes: BTreeMap<String, Value>) -> Self {
        self.attributes = attributes;
        self
    }

    /// Valid and inside its TTL.
    pub fn is_fresh(&self, now: Timestamp) -> bool {
        self.is_valid && self.expires_at > now
    }

    /// Record a read.
    pub fn touch(&mut self, now: Timestamp) {
        self.last_accessed_at = now;
        self.access_count = self.access_count.saturating_add(1);
    }

    /// Swap in a new payload, keeping `size_bytes` in sync.
    pub fn replace_payload(&mut self, payload: Payload) {
        self.size_bytes = payload.stored_size();
        self.payload = payload;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn sample(now: Timestamp) -> CacheRecord {
        let key = CacheKey::derive(CacheType::Inference, "model", &json!({"x": 1}));
        CacheRecord::new(
            key,
            CacheType::Inference,
            "model",
            json!({"prediction": 0.42}),
            0.95,
            730,
            Duration::from_secs(60),
            now,
        )
    }

    #[test]
    fn test_new_record_derives_priority() {
        let rec = sample(Utc::now());
        assert_eq!(rec.priority, RetentionPriority::Critical);
        assert_eq!(rec.access_count, 1);
        assert!(rec.size_bytes > 0);
    }

    #[test]
    fn test_freshness_window() {
        let now = Utc::now();
        let rec = sample(now);
        assert!(rec.is_fresh(now));
        assert!(!rec.is_fresh(now + chrono::Duration::seconds(61)));

        let mut invalid = rec.clone();
        invalid.is_valid = false;
        assert!(!invalid.is_fresh(now));
    }

    #[test]
    fn test_touch_updates_bookkeeping() {
        let now = Utc::now();
        let mut rec = sample(now);
        let later = now + chrono::Duration::seconds(5);
        rec.touch(later);
        assert_eq!(rec.access_count, 2);
        assert_eq!(rec.last_accessed_at, later);
    }

    #[test]
    fn test_compressed_payload_serializes_as_hex() {
        let payload = Payload::Compressed {
            bytes: vec![0xde, 0xad],
            original_size: 10,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["bytes"], "dead");
        assert_eq!(json["encoding"], "compressed");
        let back: Payload = serde_json::from_value(json).unwrap();
        assert_eq!(back, payload);
    }
}
