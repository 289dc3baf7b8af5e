//! Property tests for get-or-compute over both tiers.

use std::sync::Arc;
use std::time::Duration;

use kelp_core::{CacheMode, CacheType, RetentionPriority};
use kelp_storage::{
    CacheConfig, CacheRequest, InMemoryRecordStore, PersistentStore, ReadSource, RetentionManager,
};
use kelp_test_utils::assertions::{assert_store_unavailable, assert_unit_interval};
use kelp_test_utils::generators::{arb_cache_type, arb_feature_kind, arb_logical_id, arb_params};
use kelp_test_utils::CountingCompute;
use proptest::prelude::*;
use serde_json::Value;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Two calls inside the TTL share a key and a value, and compute runs once.
    #[test]
    fn prop_repeat_calls_compute_once(
        cache_type in arb_cache_type(),
        id in arb_logical_id(),
        params in arb_params(),
    ) {
        let rt = runtime();
        rt.block_on(async {
            let manager = RetentionManager::new(
                Arc::new(InMemoryRecordStore::new()),
                CacheConfig::default(),
            );
            let compute = CountingCompute::new();
            let request = CacheRequest::new(cache_type, id).with_params(params);

            let first = manager
                .fetch_or_compute(request.clone(), |i, p| compute.compute(i, p))
                .await
                .unwrap();
            let second = manager
                .fetch_or_compute(request, |i, p| compute.compute(i, p))
                .await
                .unwrap();

            prop_assert_eq!(first.cache_key(), second.cache_key());
            prop_assert_eq!(first.value(), second.value());
            prop_assert_eq!(compute.calls(), 1);
            prop_assert_eq!(second.source(), ReadSource::Memory);
            Ok(())
        })?;
    }

    /// An unavailable store never changes what the caller gets back.
    #[test]
    fn prop_outage_returns_computed_value(
        cache_type in arb_cache_type(),
        id in arb_logical_id(),
        params in arb_params(),
    ) {
        let rt = runtime();
        rt.block_on(async {
            let store = Arc::new(InMemoryRecordStore::new());
            store.set_available(false);
            let manager = RetentionManager::new(store, CacheConfig::default());
            let compute = CountingCompute::new();
            let reference = CountingCompute::new();

            let expected = reference.compute(id.clone(), params.clone()).await.unwrap();
            let got: Value = manager
                .get_or_compute(
                    CacheRequest::new(cache_type, id).with_params(params),
                    |i, p| compute.compute(i, p),
                )
                .await
                .unwrap();
            prop_assert_eq!(got, expected);
            Ok(())
        })?;
    }

    /// Stored feature records carry a unit-interval score and the priority it implies.
    #[test]
    fn prop_feature_records_are_scored(
        kind in arb_feature_kind(),
        id in arb_logical_id(),
        params in arb_params(),
    ) {
        let rt = runtime();
        rt.block_on(async {
            let store = Arc::new(InMemoryRecordStore::new());
            let manager = RetentionManager::new(store.clone(), CacheConfig::default());
            let request = CacheRequest::features(&id, kind, Value::Null);
            let key = request.key();

            let _: Value = manager
                .get_or_compute(request, |_, _| async move { Ok::<_, String>(params) })
                .await
                .unwrap();
            let record = store.get(CacheType::Feature, &key).await.unwrap().unwrap();

            assert_unit_interval(record.quality_score);
            prop_assert_eq!(record.feature_kind, Some(kind));
            prop_assert_eq!(
                record.priority,
                RetentionPriority::from_quality_score(record.quality_score)
            );
            Ok(())
        })?;
    }
}

#[tokio::test]
async fn test_recovered_store_is_used_again() {
    let store = Arc::new(InMemoryRecordStore::new());
    store.set_available(false);
    assert_store_unavailable(&store.ping().await);
    let manager = RetentionManager::new(
        Arc::clone(&store) as Arc<dyn PersistentStore>,
        CacheConfig::default().with_circuit(1, Duration::from_millis(50)),
    );
    let compute = CountingCompute::new();

    let _: Value = manager
        .get_or_compute(CacheRequest::new(CacheType::Inference, "a"), |i, p| {
            compute.compute(i, p)
        })
        .await
        .unwrap();
    assert!(manager.statistics().degraded);

    store.set_available(true);
    tokio::time::sleep(Duration::from_millis(80)).await;

    let _: Value = manager
        .get_or_compute(CacheRequest::new(CacheType::Inference, "b"), |i, p| {
            compute.compute(i, p)
        })
        .await
        .unwrap();
    assert!(!manager.statistics().degraded);
    assert_eq!(
        store.count(CacheType::Inference).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_mode_switch_to_read_only() {
    let store = Arc::new(InMemoryRecordStore::new());
    let manager = RetentionManager::new(
        Arc::clone(&store) as Arc<dyn PersistentStore>,
        CacheConfig::default(),
    );
    manager.set_mode(CacheMode::ReadOnly);
    let before = store.operations();
    let compute = CountingCompute::new();
    let _: Value = manager
        .get_or_compute(CacheRequest::new(CacheType::Training, "x"), |i, p| {
            compute.compute(i, p)
        })
        .await
        .unwrap();
    assert_eq!(store.operations(), before);

    manager.set_mode(CacheMode::Normal);
    let _: Value = manager
        .get_or_compute(CacheRequest::new(CacheType::Training, "y"), |i, p| {
            compute.compute(i, p)
        })
        .await
        .unwrap();
    assert!(store.operations() > before);
}
