//! Warning and error bounds per metric type.

use std::collections::BTreeMap;

use kelp_core::{AlertLevel, ConfigError, MetricType};
use serde::{Deserialize, Serialize};

const MB_PER_GB: f64 = 1024.0;

/// Which side of the bound is a breach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Values under the warning bound breach.
    Below,
    /// Values over the warning bound breach.
    Above,
}

/// Bounds for one metric type.
///
/// The warning bound is exclusive and the error bound inclusive, so a hit
/// ratio of exactly 0.6 is fine and exactly 0.4 is an error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub direction: Direction,
    pub warning: f64,
    pub error: f64,
}

impl Threshold {
    pub fn below(warning: f64, error: f64) -> Self {
        Self {
            direction: Direction::Below,
            warning,
            error,
        }
    }

    pub fn above(warning: f64, error: f64) -> Self {
        Self {
            direction: Direction::Above,
            warning,
            error,
        }
    }

    /// Highest level breached by `value` with the bound it crossed.
    pub fn evaluate(&self, value: f64) -> Option<(AlertLevel, f64)> {
        match self.direction {
            Direction::Below if value <= self.error => Some((AlertLevel::Error, self.error)),
            Direction::Below if value < self.warning => Some((AlertLevel::Warning, self.warning)),
            Direction::Above if value >= self.error => Some((AlertLevel::Error, self.error)),
            Direction::Above if value > self.warning => Some((AlertLevel::Warning, self.warning)),
            _ => None,
        }
    }

    fn validate(&self, metric: MetricType) -> Result<(), ConfigError> {
        let ordered = match self.direction {
            Direction::Below => self.error <= self.warning,
            Direction::Above => self.error >= self.warning,
        };
        if !self.warning.is_finite() || !self.error.is_finite() || !ordered {
            return Err(ConfigError::InvalidValue {
                field: format!("monitor.thresholds.{metric}"),
                value: format!("warning={} error={}", self.warning, self.error),
                reason: "error bound must lie beyond the warning bound".to_string(),
            });
        }
        Ok(())
    }
}

/// Threshold table keyed by metric type. Metrics without an entry never alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thresholds(BTreeMap<MetricType, Threshold>);

impl Default for Thresholds {
    fn default() -> Self {
        let mut table = BTreeMap::new();
        table.insert(MetricType::HitRatio, Threshold::below(0.6, 0.4));
        table.insert(MetricType::ResponseTime, Threshold::above(500.0, 1000.0));
        table.insert(
            MetricType::SpaceUsage,
            Threshold::above(10.0 * MB_PER_GB, 15.0 * MB_PER_GB),
        );
        table.insert(MetricType::DataQuality, Threshold::below(0.7, 0.5));
        Self(table)
    }
}

impl Thresholds {
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with(mut self, metric: MetricType, threshold: Threshold) -> Self {
        self.0.insert(metric, threshold);
        self
    }

    pub fn get(&self, metric: MetricType) -> Option<&Threshold> {
        self.0.get(&metric)
    }

    pub fn evaluate(&self, metric: MetricType, value: f64) -> Option<(AlertLevel, f64)> {
        self.0.get(&metric).and_then(|t| t.evaluate(value))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.0.iter().try_for_each(|(m, t)| t.validate(*m))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_highest_level_is_reported() {
        let t = Thresholds::default();
        assert_eq!(
            t.evaluate(MetricType::HitRatio, 0.5),
            Some((AlertLevel::Warning, 0.6))
        );
        assert_eq!(
            t.evaluate(MetricType::HitRatio, 0.4),
            Some((AlertLevel::Error, 0.4))
        );
        assert_eq!(t.evaluate(MetricType::HitRatio, 0.6), None);
        assert_eq!(
            t.evaluate(MetricType::ResponseTime, 1000.0),
            Some((AlertLevel::Error, 1000.0))
        );
        assert_eq!(t.evaluate(MetricType::ResponseTime, 500.0), None);
    }

    #[test]
    fn test_space_bounds_are_megabytes() {
        let t = Thresholds::default();
        assert_eq!(t.evaluate(MetricType::SpaceUsage, 9_000.0), None);
        assert_eq!(
            t.evaluate(MetricType::SpaceUsage, 12_000.0).map(|(l, _)| l),
            Some(AlertLevel::Warning)
        );
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let t = Thresholds::default().with(MetricType::HitRatio, Threshold::below(0.4, 0.6));
        assert!(t.validate().is_err());
        assert!(Thresholds::default().validate().is_ok());
    }
}
