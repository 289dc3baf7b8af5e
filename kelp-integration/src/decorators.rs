//! Caching decorators installed over [`FunctionSlot`](crate::FunctionSlot)s.
//!
//! A decorator derives a [`CacheRequest`] from the call arguments and answers
//! through the retention manager. Calls whose arguments carry no usable key
//! go straight to the original, and the original's own errors come back
//! unchanged.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kelp_core::{CacheType, FeatureKind};
use kelp_pipeline::{FeatureExtractionPipeline, HookEvent, HookPoint, HookRegistry};
use kelp_storage::{CacheRequest, ReadSource, RetentionManager};
use serde_json::{json, Value};

use crate::function::{CallResult, MlFunction};

const DEFAULT_DATA_VERSION: &str = "latest";

#[derive(Debug, Default)]
pub(crate) struct CallCounters {
    pub intercepted: AtomicU64,
    pub served_from_cache: AtomicU64,
    pub computed: AtomicU64,
    pub direct_calls: AtomicU64,
    pub records_enqueued: AtomicU64,
    pub enqueue_failures: AtomicU64,
}

/// How a decorated call maps its arguments to a cache entry.
#[derive(Debug, Clone, PartialEq)]
pub enum KeySpec {
    /// `{model_id, input}` to an inference entry with the given TTL.
    Prediction { ttl: Duration },
    /// `{model_type, data_version?, params?}` to a training entry.
    Training,
    /// `{record_id, feature_kind, params?}` to a feature entry.
    Features,
    /// The whole argument object, keyed under the target's own name.
    Custom { cache_type: CacheType },
}

impl KeySpec {
    /// `None` when the arguments lack the fields the key is built from.
    pub fn request(&self, target: &str, args: &Value) -> Option<CacheRequest> {
        match self {
            KeySpec::Prediction { ttl } => {
                let model_id = args.get("model_id")?.as_str()?;
                let input = args.get("input")?.clone();
                Some(CacheRequest::prediction(model_id, input).with_ttl(*ttl))
            }
            KeySpec::Training => {
                let model_type = args.get("model_type")?.as_str()?;
                let data_version = match args.get("data_version") {
                    None | Some(Value::Null) => DEFAULT_DATA_VERSION,
                    Some(v) => v.as_str()?,
                };
                let params = args.get("params").cloned().unwrap_or(Value::Null);
                Some(CacheRequest::training(model_type, data_version, params))
            }
            KeySpec::Features => {
                let record_id = args.get("record_id")?.as_str()?;
                let kind: FeatureKind = args.get("feature_kind")?.as_str()?.parse().ok()?;
                let params = args.get("params").cloned().unwrap_or(Value::Null);
                Some(CacheRequest::features(record_id, kind, params))
            }
            KeySpec::Custom { cache_type } => {
                Some(CacheRequest::new(*cache_type, target).with_params(args.clone()))
            }
        }
    }

    fn hook_points(&self) -> Option<(HookPoint, HookPoint)> {
        match self {
            KeySpec::Prediction { .. } => Some((HookPoint::BeforePredict, HookPoint::AfterPredict)),
            KeySpec::Training => Some((HookPoint::BeforeTrain, HookPoint::AfterTrain)),
            KeySpec::Features | KeySpec::Custom { .. } => None,
        }
    }
}

/// Cache-aside wrapper over one original function.
pub struct CachedCall {
    target: String,
    spec: KeySpec,
    original: Arc<dyn MlFunction>,
    manager: Arc<RetentionManager>,
    hooks: Option<Arc<HookRegistry>>,
    counters: Arc<CallCounters>,
}

impl CachedCall {
    pub(crate) fn new(
        target: impl Into<String>,
        spec: KeySpec,
        original: Arc<dyn MlFunction>,
        manager: Arc<RetentionManager>,
        hooks: Option<Arc<HookRegistry>>,
        counters: Arc<CallCounters>,
    ) -> Self {
        Self {
            target: target.into(),
            spec,
            original,
            manager,
            hooks,
            counters,
        }
    }

    fn fire(&self, point: HookPoint, logical_id: &str, payload: Value) {
        if let Some(hooks) = &self.hooks {
            hooks.fire(&HookEvent::new(point, logical_id, payload));
        }
    }
}

#[async_trait]
impl MlFunction for CachedCall {
    async fn call(&self, args: Value) -> CallResult {
        self.counters.intercepted.fetch_add(1, Ordering::Relaxed);
        let Some(request) = self.spec.request(&self.target, &args) else {
            self.counters.direct_calls.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(target_fn = %self.target, "No cache key in arguments, calling original");
            return self.original.call(args).await;
        };

        let logical_id = request.logical_id.clone();
        let hook_points = self.spec.hook_points();
        if let Some((before, _)) = hook_points {
            self.fire(before, &logical_id, args.clone());
        }

        let original = Arc::clone(&self.original);
        let read = self
            .manager
            .fetch_or_compute(request, move |_, _| async move { original.call(args).await })
            .await?;

        match read.source() {
            ReadSource::Computed => self.counters.computed.fetch_add(1, Ordering::Relaxed),
            ReadSource::Memory | ReadSource::Persistent => {
                self.counters.served_from_cache.fetch_add(1, Ordering::Relaxed)
            }
        };
        tracing::debug!(
            target_fn = %self.target,
            logical_id = %logical_id,
            cache_key = %read.cache_key(),
            source = ?read.source(),
            "Decorated call answered"
        );

        if let Some((_, after)) = hook_points {
            self.fire(
                after,
                &logical_id,
                json!({"cache_hit": read.was_cache_hit(), "result": read.value()}),
            );
        }
        Ok(read.into_value())
    }
}

/// Calls the original retrieval, then queues the returned record for feature
/// extraction.
pub struct RecordRetrieval {
    target: String,
    original: Arc<dyn MlFunction>,
    pipeline: Arc<FeatureExtractionPipeline>,
    counters: Arc<CallCounters>,
}

impl RecordRetrieval {
    pub(crate) fn new(
        target: impl Into<String>,
        original: Arc<dyn MlFunction>,
        pipeline: Arc<FeatureExtractionPipeline>,
        counters: Arc<CallCounters>,
    ) -> Self {
        Self {
            target: target.into(),
            original,
            pipeline,
            counters,
        }
    }
}

#[async_trait]
impl MlFunction for RecordRetrieval {
    async fn call(&self, args: Value) -> CallResult {
        self.counters.intercepted.fetch_add(1, Ordering::Relaxed);
        let fallback_id = args
            .get("record_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        let record = self.original.call(args).await?;

        let record_id = record
            .get("record_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or(fallback_id);
        let Some(record_id) = record_id else {
            return Ok(record);
        };

        match self.pipeline.submit_record(&record_id, record.clone()).await {
            Ok(state) => {
                self.counters.records_enqueued.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    target_fn = %self.target,
                    record_id = %record_id,
                    state = state.name(),
                    "Retrieved record submitted for feature extraction"
                );
            }
            Err(e) => {
                self.counters.enqueue_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    target_fn = %self.target,
                    record_id = %record_id,
                    error = %e,
                    "Could not submit retrieved record for feature extraction"
                );
            }
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prediction_key_needs_model_and_input() {
        let spec = KeySpec::Prediction {
            ttl: Duration::from_secs(60),
        };
        let request = spec
            .request("ml.predict", &json!({"model_id": "kelp-v2", "input": [1, 2]}))
            .unwrap();
        assert_eq!(request.cache_type, CacheType::Inference);
        assert_eq!(request.logical_id, "kelp-v2");
        assert_eq!(request.ttl, Some(Duration::from_secs(60)));

        assert!(spec.request("ml.predict", &json!({"input": [1, 2]})).is_none());
        assert!(spec.request("ml.predict", &json!({"model_id": 7, "input": 1})).is_none());
    }

    #[test]
    fn test_training_defaults_to_latest_version() {
        let implicit = KeySpec::Training
            .request("ml.prepare_training", &json!({"model_type": "abundance"}))
            .unwrap();
        let explicit = KeySpec::Training
            .request(
                "ml.prepare_training",
                &json!({"model_type": "abundance", "data_version": "latest"}),
            )
            .unwrap();
        assert_eq!(implicit.key(), explicit.key());
    }

    #[test]
    fn test_features_reject_unknown_kind() {
        let ok = KeySpec::Features.request(
            "ml.extract_features",
            &json!({"record_id": "r-1", "feature_kind": "spatial"}),
        );
        assert_eq!(ok.unwrap().feature_kind, Some(FeatureKind::Spatial));

        let unknown = KeySpec::Features.request(
            "ml.extract_features",
            &json!({"record_id": "r-1", "feature_kind": "acoustic"}),
        );
        assert!(unknown.is_none());
    }

    #[test]
    fn test_custom_keys_on_target_and_whole_arguments() {
        let spec = KeySpec::Custom {
            cache_type: CacheType::AggregatedSeries,
        };
        let a = spec.request("stats.rollup", &json!({"b": 1, "a": 2})).unwrap();
        let b = spec.request("stats.rollup", &json!({"a": 2, "b": 1})).unwrap();
        assert_eq!(a.logical_id, "stats.rollup");
        assert_eq!(a.key(), b.key());
    }
}
