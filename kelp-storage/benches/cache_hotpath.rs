//! Benchmarks for the cache lookup hot path.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use kelp_core::{CacheKey, CacheType};
use kelp_storage::{CacheConfig, CacheRequest, InMemoryRecordStore, MemoryTier, RetentionManager};
use serde_json::{json, Value};
use std::sync::Arc;

fn bench_key_derivation(c: &mut Criterion) {
    let params = json!({
        "latitude": -12.58,
        "longitude": 13.41,
        "depth": [5, 250],
        "model": {"name": "rf", "version": 3},
    });
    c.bench_function("cache_key_derive", |b| {
        b.iter(|| CacheKey::derive(CacheType::Inference, black_box("model-rf"), black_box(&params)))
    });
}

fn bench_memory_tier(c: &mut Criterion) {
    let tier = MemoryTier::new(1000);
    let expires = chrono::Utc::now() + chrono::Duration::hours(1);
    let keys: Vec<CacheKey> = (0..1000)
        .map(|i| CacheKey::derive(CacheType::Feature, &i.to_string(), &Value::Null))
        .collect();
    for key in &keys {
        let _ = tier.insert(CacheType::Feature, key.clone(), json!({"v": 1}), expires);
    }
    let now = chrono::Utc::now();
    c.bench_function("memory_tier_get", |b| {
        b.iter(|| tier.get(CacheType::Feature, black_box(&keys[500]), now))
    });
}

fn bench_get_or_compute_hit(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");
    let manager = RetentionManager::new(Arc::new(InMemoryRecordStore::new()), CacheConfig::default());
    let request = CacheRequest::new(CacheType::Inference, "model-rf").with_params(json!({"x": 1}));
    rt.block_on(async {
        let _: Result<Value, String> = manager
            .get_or_compute(request.clone(), |_, _| async { Ok(json!({"p": 0.4})) })
            .await;
    });
    c.bench_function("get_or_compute_memory_hit", |b| {
        b.iter(|| {
            rt.block_on(async {
                let _: Result<Value, String> = manager
                    .get_or_compute(request.clone(), |_, _| async { Ok(json!({"p": 0.4})) })
                    .await;
            })
        })
    });
}

criterion_group!(benches, bench_key_derivation, bench_memory_tier, bench_get_or_compute_hit);
criterion_main!(benches);
