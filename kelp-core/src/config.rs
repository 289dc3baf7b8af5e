//! Configuration pieces shared by several components, plus env helpers.

use crate::error::ConfigError;
use crate::{CacheType, RetentionPriority};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// ENV HELPERS
// ============================================================================

/// Parse an env var, falling back to `default` when unset or unparseable.
pub fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Read a duration expressed in whole seconds.
pub fn env_secs(key: &str, default: Duration) -> Duration {
    Duration::from_secs(env_parse(key, default.as_secs()))
}

/// Read a boolean; anything other than `false`/`0`/`no` counts as true.
pub fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| !matches!(s.trim().to_lowercase().as_str(), "false" | "0" | "no"))
        .unwrap_or(default)
}

// ============================================================================
// TTL
// ============================================================================

/// Freshness window applied to newly written records, per cache type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlConfig {
    pub feature: Duration,
    pub training: Duration,
    pub inference: Duration,
    pub aggregated_series: Duration,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            feature: Duration::from_secs(24 * 3600),
            training: Duration::from_secs(30 * 24 * 3600),
            inference: Duration::from_secs(6 * 3600),
            aggregated_series: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

impl TtlConfig {
    /// Read `KELP_TTL_{FEATURE,TRAINING,INFERENCE,AGGREGATED}_SECS`.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            feature: env_secs("KELP_TTL_FEATURE_SECS", d.feature),
            training: env_secs("KELP_TTL_TRAINING_SECS", d.training),
            inference: env_secs("KELP_TTL_INFERENCE_SECS", d.inference),
            aggregated_series: env_secs("KELP_TTL_AGGREGATED_SECS", d.aggregated_series),
        }
    }

    pub fn for_type(&self, cache_type: CacheType) -> Duration {
        match cache_type {
            CacheType::Feature => self.feature,
            CacheType::Training => self.training,
            CacheType::Inference => self.inference,
            CacheType::AggregatedSeries => self.aggregated_series,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for ct in CacheType::ALL {
            if self.for_type(ct).is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: format!("ttl.{}", ct),
                    value: "0".to_string(),
                    reason: "TTL must be positive".to_string(),
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// RETENTION TIERS
// ============================================================================

/// Default retention length in days for each priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionTiers {
    pub critical_days: u32,
    pub high_days: u32,
    pub normal_days: u32,
    pub low_days: u32,
}

impl Default for RetentionTiers {
    fn default() -> Self {
        Self {
            critical_days: 730,
            high_days: 365,
            normal_days: 180,
            low_days: 90,
        }
    }
}

impl RetentionTiers {
    pub fn days_for(&self, priority: RetentionPriority) -> u32 {
        match priority {
            RetentionPriority::Critical => self.critical_days,
            RetentionPriority::High => self.high_days,
            RetentionPriority::Normal => self.normal_days,
            RetentionPriority::Low => self.low_days,
        }
    }

    /// Tiers must not shrink as priority rises.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ordered = self.low_days <= self.normal_days
            && self.normal_days <= self.high_days
            && self.high_days <= self.critical_days;
        if !ordered {
            return Err(ConfigError::InvalidValue {
                field: "retention_tiers".to_string(),
                value: format!(
                    "{}/{}/{}/{}",
                    self.low_days, self.normal_days, self.high_days, self.critical_days
                ),
                reason: "days must be non-decreasing from low to critical".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// QUALITY WEIGHTS
// ============================================================================

/// Per-cache-type multiplier applied to payload completeness.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityWeights {
    pub feature: f64,
    pub training: f64,
    pub inference: f64,
    pub aggregated_series: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            feature: 1.0,
            training: 1.0,
            inference: 1.0,
            aggregated_series: 1.0,
        }
    }
}

impl QualityWeights {
    pub fn multiplier(&self, cache_type: CacheType) -> f64 {
        match cache_type {
            CacheType::Feature => self.feature,
            CacheType::Training => self.training,
            CacheType::Inference => self.inference,
            CacheType::AggregatedSeries => self.aggregated_series,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for ct in CacheType::ALL {
            let m = self.multiplier(ct);
            if !m.is_finite() || m <= 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: format!("quality_weights.{}", ct),
                    value: m.to_string(),
                    reason: "multiplier must be a positive number".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ttls() {
        let ttl = TtlConfig::default();
        assert_eq!(ttl.for_type(CacheType::Inference), Duration::from_secs(6 * 3600));
        assert_eq!(ttl.for_type(CacheType::Feature), Duration::from_secs(86_400));
        assert!(ttl.validate().is_ok());
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let ttl = TtlConfig {
            inference: Duration::ZERO,
            ..TtlConfig::default()
        };
        assert!(ttl.validate().is_err());
    }

    #[test]
    fn test_tiers_longest_for_critical() {
        let tiers = RetentionTiers::default();
        assert_eq!(tiers.days_for(RetentionPriority::Critical), 730);
        assert!(tiers.validate().is_ok());

        let inverted = RetentionTiers {
            low_days: 800,
            ..tiers
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_quality_weights_reject_non_positive() {
        let weights = QualityWeights {
            training: 0.0,
            ..QualityWeights::default()
        };
        assert!(weights.validate().is_err());
    }

    #[test]
    fn test_env_bool_parsing() {
        std::env::set_var("KELP_TEST_ENV_BOOL", "no");
        assert!(!env_bool("KELP_TEST_ENV_BOOL", true));
        std::env::remove_var("KELP_TEST_ENV_BOOL");
        assert!(env_bool("KELP_TEST_ENV_BOOL", true));
    }
}
