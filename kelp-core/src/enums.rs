//! Enum types shared across kelp components

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error when parsing an enum from its string form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumParseError {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for EnumParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for EnumParseError {}

/// Implements `Display`/`FromStr` through the `as_str` table of an enum.
macro_rules! string_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $ty {
            /// Stable string form, also used as storage and config value.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $s,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = EnumParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    $($s => Ok($ty::$variant),)+
                    _ => Err(EnumParseError { kind: $kind, value: s.to_string() }),
                }
            }
        }
    };
}

// ============================================================================
// CACHE ENUMS
// ============================================================================

/// The four record collections held by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheType {
    /// Extracted features for a domain record
    Feature,
    /// Prepared training sets
    Training,
    /// Model predictions
    Inference,
    /// Pre-aggregated time series
    AggregatedSeries,
}

impl CacheType {
    pub const ALL: [CacheType; 4] = [
        CacheType::Feature,
        CacheType::Training,
        CacheType::Inference,
        CacheType::AggregatedSeries,
    ];
}

string_enum!(CacheType, "cache type", {
    Feature => "feature",
    Training => "training",
    Inference => "inference",
    AggregatedSeries => "aggregated_series",
});

/// Retention priority derived from a record's quality score.
///
/// Ordering is meaningful: `Low < Normal < High < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum RetentionPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl RetentionPriority {
    /// Bucket a quality score. Thresholds are inclusive lower bounds.
    pub fn from_quality_score(score: f64) -> Self {
        if score >= 0.9 {
            RetentionPriority::Critical
        } else if score >= 0.7 {
            RetentionPriority::High
        } else if score >= 0.5 {
            RetentionPriority::Normal
        } else {
            RetentionPriority::Low
        }
    }
}

string_enum!(RetentionPriority, "retention priority", {
    Low => "low",
    Normal => "normal",
    High => "high",
    Critical => "critical",
});

/// Whether the persistent tier may be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    #[default]
    Normal,
    /// Memory tier only; nothing is read from or written to the persistent store.
    ReadOnly,
}

string_enum!(CacheMode, "cache mode", {
    Normal => "normal",
    ReadOnly => "readonly",
});

/// Feature family produced by an extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureKind {
    Temporal,
    Spatial,
    Environmental,
    Species,
}

impl FeatureKind {
    pub const ALL: [FeatureKind; 4] = [
        FeatureKind::Temporal,
        FeatureKind::Spatial,
        FeatureKind::Environmental,
        FeatureKind::Species,
    ];

    /// Quality multiplier; richer feature families weigh more.
    pub fn quality_multiplier(&self) -> f64 {
        match self {
            FeatureKind::Temporal => 1.0,
            FeatureKind::Spatial => 1.1,
            FeatureKind::Environmental => 1.2,
            FeatureKind::Species => 1.3,
        }
    }
}

string_enum!(FeatureKind, "feature kind", {
    Temporal => "temporal",
    Spatial => "spatial",
    Environmental => "environmental",
    Species => "species",
});

// ============================================================================
// POLICY ENUMS
// ============================================================================

/// What a retention policy does with matching records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    Delete,
    /// Move into the archive collection
    Archive,
    /// Replace the payload with its compressed form
    Compress,
    /// Move into another cache type
    Migrate,
}

string_enum!(PolicyAction, "policy action", {
    Delete => "delete",
    Archive => "archive",
    Compress => "compress",
    Migrate => "migrate",
});

// ============================================================================
// MONITORING ENUMS
// ============================================================================

/// Metric families sampled by the performance monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    HitRatio,
    ResponseTime,
    SpaceUsage,
    DataQuality,
}

impl MetricType {
    pub const ALL: [MetricType; 4] = [
        MetricType::HitRatio,
        MetricType::ResponseTime,
        MetricType::SpaceUsage,
        MetricType::DataQuality,
    ];

    pub fn unit(&self) -> &'static str {
        match self {
            MetricType::HitRatio => "ratio",
            MetricType::ResponseTime => "ms",
            MetricType::SpaceUsage => "MB",
            MetricType::DataQuality => "score",
        }
    }

    /// Whether a larger value is an improvement.
    pub fn higher_is_better(&self) -> bool {
        matches!(self, MetricType::HitRatio | MetricType::DataQuality)
    }
}

string_enum!(MetricType, "metric type", {
    HitRatio => "hit_ratio",
    ResponseTime => "response_time",
    SpaceUsage => "space_usage",
    DataQuality => "data_quality",
});

/// Severity of a performance alert. Ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    Critical,
}

string_enum!(AlertLevel, "alert level", {
    Info => "info",
    Warning => "warning",
    Error => "error",
    Critical => "critical",
});

/// Direction of a metric over a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Stable,
    Degrading,
}

string_enum!(Trend, "trend", {
    Improving => "improving",
    Stable => "stable",
    Degrading => "degrading",
});
