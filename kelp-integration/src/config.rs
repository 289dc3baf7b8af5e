//! Integration layer configuration.

use std::time::Duration;

use kelp_core::{env_bool, env_secs, ConfigError};

/// Configuration for the integration layer.
#[derive(Debug, Clone, PartialEq)]
pub struct IntegrationConfig {
    /// Freshness of cached predictions (default: 6h)
    pub prediction_ttl: Duration,
    /// Enable in read-only edge mode (default: false)
    pub edge_mode: bool,
    /// Hit ratio under which caching is reported as poor (default: 0.1)
    pub poor_hit_ratio: f64,
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            prediction_ttl: Duration::from_secs(6 * 3600),
            edge_mode: false,
            poor_hit_ratio: 0.1,
        }
    }
}

impl IntegrationConfig {
    /// Create IntegrationConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `KELP_INTEGRATION_PREDICTION_TTL_SECS`: prediction freshness (default: 21600)
    /// - `KELP_INTEGRATION_EDGE_MODE`: start in edge mode (default: false)
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            prediction_ttl: env_secs("KELP_INTEGRATION_PREDICTION_TTL_SECS", d.prediction_ttl),
            edge_mode: env_bool("KELP_INTEGRATION_EDGE_MODE", d.edge_mode),
            poor_hit_ratio: d.poor_hit_ratio,
        }
    }

    pub fn with_prediction_ttl(mut self, ttl: Duration) -> Self {
        self.prediction_ttl = ttl;
        self
    }

    pub fn with_edge_mode(mut self, edge_mode: bool) -> Self {
        self.edge_mode = edge_mode;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prediction_ttl.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "integration.prediction_ttl".to_string(),
                value: "0".to_string(),
                reason: "cached predictions need a positive lifetime".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.poor_hit_ratio) {
            return Err(ConfigError::InvalidValue {
                field: "integration.poor_hit_ratio".to_string(),
                value: self.poor_hit_ratio.to_string(),
                reason: "must be within [0, 1]".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = IntegrationConfig::default();
        assert_eq!(config.prediction_ttl, Duration::from_secs(21600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let config = IntegrationConfig::default().with_prediction_ttl(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "integration.prediction_ttl"
        ));
    }
}
