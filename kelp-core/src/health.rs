//! Component health reporting shared by the monitor, integration layer and
//! supervisor.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Health status for a component. Ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health check result for one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub component: String,
    /// Reasons the component is not healthy, if any.
    pub issues: Vec<String>,
    pub metadata: BTreeMap<String, Value>,
}

impl HealthCheck {
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Healthy,
            component: component.into(),
            issues: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Record an issue, lowering status to at least `status`.
    pub fn with_issue(mut self, status: HealthStatus, issue: impl Into<String>) -> Self {
        self.status = self.status.max(status);
        self.issues.push(issue.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Worst status across several checks; healthy when empty.
    pub fn overall<'a>(checks: impl IntoIterator<Item = &'a HealthCheck>) -> HealthStatus {
        checks
            .into_iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy)
    }
}
