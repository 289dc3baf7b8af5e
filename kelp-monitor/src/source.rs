//! Where samples come from.

use std::sync::Arc;

use async_trait::async_trait;
use kelp_core::{KelpResult, MetricType, PerformanceMetric, Timestamp};
use kelp_storage::RetentionManager;
use serde_json::json;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Produces metric samples on demand.
#[async_trait]
pub trait MetricSource: Send + Sync {
    fn name(&self) -> &str;

    /// Take one sample of every metric this source tracks, stamped `at`.
    async fn collect(&self, at: Timestamp) -> KelpResult<Vec<PerformanceMetric>>;
}

/// Hit ratio, lookup latency, space and quality read from a [`RetentionManager`].
///
/// Hit ratio and latency are skipped until the manager has served a lookup,
/// and quality until the store holds a record, so an idle cache does not
/// look like a failing one.
pub struct ManagerSource {
    manager: Arc<RetentionManager>,
}

impl ManagerSource {
    pub fn new(manager: Arc<RetentionManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl MetricSource for ManagerSource {
    fn name(&self) -> &str {
        "retention_manager"
    }

    async fn collect(&self, at: Timestamp) -> KelpResult<Vec<PerformanceMetric>> {
        let stats = self.manager.statistics();
        let mut samples = Vec::with_capacity(MetricType::ALL.len());

        let lookups = stats.hits + stats.misses;
        if lookups > 0 {
            samples.push(
                PerformanceMetric::new(MetricType::HitRatio, stats.hit_ratio, at)
                    .with_context("source", json!(self.name()))
                    .with_context("lookups", json!(lookups))
                    .with_context("mode", json!(stats.mode.as_str())),
            );
            samples.push(
                PerformanceMetric::new(MetricType::ResponseTime, stats.avg_lookup_ms, at)
                    .with_context("source", json!(self.name()))
                    .with_context("degraded", json!(stats.degraded)),
            );
        }

        // A store outage still yields the in-process metrics above.
        match self.manager.store_stats().await {
            Ok(store) => {
                let per_type: serde_json::Map<_, _> = store
                    .per_type
                    .iter()
                    .map(|(ct, s)| (ct.as_str().to_string(), json!(s.bytes as f64 / BYTES_PER_MB)))
                    .collect();
                samples.push(
                    PerformanceMetric::new(
                        MetricType::SpaceUsage,
                        store.total_bytes() as f64 / BYTES_PER_MB,
                        at,
                    )
                    .with_context("per_type_mb", serde_json::Value::Object(per_type))
                    .with_context("archived_records", json!(store.archived_records)),
                );
                if store.total_records() > 0 {
                    samples.push(
                        PerformanceMetric::new(MetricType::DataQuality, store.avg_quality(), at)
                            .with_context("records", json!(store.total_records())),
                    );
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Store statistics unavailable, sampling in-process metrics only");
            }
        }
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kelp_core::CacheType;
    use kelp_storage::{CacheConfig, CacheRequest, InMemoryRecordStore};
    use kelp_test_utils::CountingCompute;

    #[tokio::test]
    async fn test_idle_manager_reports_space_only() {
        let store = Arc::new(InMemoryRecordStore::new());
        let manager = Arc::new(RetentionManager::new(store, CacheConfig::default()));
        let samples = ManagerSource::new(manager)
            .collect(chrono::Utc::now())
            .await
            .unwrap();
        let types: Vec<_> = samples.iter().map(|m| m.metric_type).collect();
        assert_eq!(types, vec![MetricType::SpaceUsage]);
    }

    #[tokio::test]
    async fn test_samples_after_traffic() {
        let store = Arc::new(InMemoryRecordStore::new());
        let manager = Arc::new(RetentionManager::new(store.clone(), CacheConfig::default()));
        let compute = CountingCompute::new();
        for _ in 0..2 {
            let _: serde_json::Value = manager
                .get_or_compute(CacheRequest::new(CacheType::Inference, "m"), |i, p| {
                    compute.compute(i, p)
                })
                .await
                .unwrap();
        }
        let source = ManagerSource::new(manager);
        let samples = source.collect(chrono::Utc::now()).await.unwrap();
        let hit = samples
            .iter()
            .find(|m| m.metric_type == MetricType::HitRatio)
            .unwrap();
        assert!((hit.value - 0.5).abs() < 1e-9);
        assert_eq!(samples.len(), 4);

        store.set_available(false);
        let samples = source.collect(chrono::Utc::now()).await.unwrap();
        let types: Vec<_> = samples.iter().map(|m| m.metric_type).collect();
        assert_eq!(types, vec![MetricType::HitRatio, MetricType::ResponseTime]);
    }
}
