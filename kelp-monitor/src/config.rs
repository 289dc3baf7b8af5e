//! Monitor configuration.

use std::time::Duration;

use kelp_core::{env_parse, env_secs, ConfigError};

use crate::thresholds::Thresholds;

/// Configuration for the performance monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Interval between samples (default: 5 minutes)
    pub sample_interval: Duration,
    /// Minimum gap between two alerts of the same metric and level (default: 15 minutes)
    pub alert_cooldown: Duration,
    /// Samples and alerts older than this are dropped (default: 30 days)
    pub metric_retention: Duration,
    /// Consecutive breaching samples before an alert fires (default: 2)
    pub sustained_breaches: u32,
    /// Alerts kept in memory (default: 1000)
    pub alert_history: usize,
    pub thresholds: Thresholds,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(300),
            alert_cooldown: Duration::from_secs(900),
            metric_retention: Duration::from_secs(30 * 24 * 3600),
            sustained_breaches: 2,
            alert_history: 1000,
            thresholds: Thresholds::default(),
        }
    }
}

impl MonitorConfig {
    /// Create MonitorConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `KELP_MONITOR_SAMPLE_SECS`: sampling interval (default: 300)
    /// - `KELP_MONITOR_COOLDOWN_SECS`: alert cooldown (default: 900)
    /// - `KELP_MONITOR_RETENTION_DAYS`: sample retention (default: 30)
    /// - `KELP_MONITOR_SUSTAINED_BREACHES`: samples before alerting (default: 2)
    /// - `KELP_MONITOR_ALERT_HISTORY`: alerts kept (default: 1000)
    pub fn from_env() -> Self {
        let d = Self::default();
        let retention_days = env_parse(
            "KELP_MONITOR_RETENTION_DAYS",
            d.metric_retention.as_secs() / 86_400,
        );
        Self {
            sample_interval: env_secs("KELP_MONITOR_SAMPLE_SECS", d.sample_interval),
            alert_cooldown: env_secs("KELP_MONITOR_COOLDOWN_SECS", d.alert_cooldown),
            metric_retention: Duration::from_secs(retention_days * 86_400),
            sustained_breaches: env_parse("KELP_MONITOR_SUSTAINED_BREACHES", d.sustained_breaches),
            alert_history: env_parse("KELP_MONITOR_ALERT_HISTORY", d.alert_history),
            thresholds: d.thresholds,
        }
    }

    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    pub fn with_alert_cooldown(mut self, cooldown: Duration) -> Self {
        self.alert_cooldown = cooldown;
        self
    }

    pub fn with_metric_retention(mut self, retention: Duration) -> Self {
        self.metric_retention = retention;
        self
    }

    pub fn with_sustained_breaches(mut self, samples: u32) -> Self {
        self.sustained_breaches = samples;
        self
    }

    pub fn with_alert_history(mut self, limit: usize) -> Self {
        self.alert_history = limit;
        self
    }

    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, value: String, reason: &str| ConfigError::InvalidValue {
            field: format!("monitor.{field}"),
            value,
            reason: reason.to_string(),
        };
        if self.sample_interval.is_zero() {
            return Err(invalid("sample_interval", "0".into(), "must be positive"));
        }
        if self.metric_retention < self.sample_interval {
            return Err(invalid(
                "metric_retention",
                format!("{:?}", self.metric_retention),
                "must cover at least one sample interval",
            ));
        }
        if self.sustained_breaches == 0 {
            return Err(invalid("sustained_breaches", "0".into(), "must be at least 1"));
        }
        if self.alert_history == 0 {
            return Err(invalid("alert_history", "0".into(), "must be at least 1"));
        }
        self.thresholds.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sustained_breaches, 2);
        assert_eq!(config.alert_cooldown, Duration::from_secs(900));
    }

    #[test]
    fn test_zero_breaches_rejected() {
        let err = MonitorConfig::default()
            .with_sustained_breaches(0)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("sustained_breaches"));
    }
}
