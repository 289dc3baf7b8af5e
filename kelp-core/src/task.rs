//! Pipeline work items.

use crate::{new_event_id, EventId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of background work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Run every extractor over a submitted domain record.
    ExtractFeatures,
    /// Summarise a numeric series into the aggregated-series cache.
    CreateAggregation,
}

/// Transient queue entry. Delivery is at-least-once; processing is
/// idempotent because every write goes through a derived cache key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineTask {
    pub task_id: EventId,
    pub task_type: TaskType,
    pub target_id: String,
    pub payload: Value,
    pub enqueued_at: Timestamp,
}

impl PipelineTask {
    pub fn new(
        task_type: TaskType,
        target_id: impl Into<String>,
        payload: Value,
        now: Timestamp,
    ) -> Self {
        Self {
            task_id: new_event_id(),
            task_type,
            target_id: target_id.into(),
            payload,
            enqueued_at: now,
        }
    }
}
