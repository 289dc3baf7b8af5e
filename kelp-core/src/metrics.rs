//! Performance samples and alerts.

use crate::{new_event_id, AlertLevel, EventId, MetricType, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One sampled value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetric {
    pub metric_type: MetricType,
    pub value: f64,
    pub unit: String,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
}

impl PerformanceMetric {
    pub fn new(metric_type: MetricType, value: f64, timestamp: Timestamp) -> Self {
        Self {
            metric_type,
            value,
            unit: metric_type.unit().to_string(),
            timestamp,
            context: BTreeMap::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }
}

/// Threshold breach raised by the monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceAlert {
    pub alert_id: EventId,
    pub level: AlertLevel,
    pub metric_type: MetricType,
    pub current_value: f64,
    pub threshold: f64,
    pub message: String,
    pub timestamp: Timestamp,
    pub resolved: bool,
    pub resolved_at: Option<Timestamp>,
}

impl PerformanceAlert {
    pub fn raise(
        level: AlertLevel,
        metric_type: MetricType,
        current_value: f64,
        threshold: f64,
        message: impl Into<String>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            alert_id: new_event_id(),
            level,
            metric_type,
            current_value,
            threshold,
            message: message.into(),
            timestamp,
            resolved: false,
            resolved_at: None,
        }
    }

    /// Mark resolved; a second call keeps the first resolution time.
    pub fn resolve(&mut self, at: Timestamp) {
        if !self.resolved {
            self.resolved = true;
            self.resolved_at = Some(at);
        }
    }
}
