//! Integration tests driving the front door (`CacheEngine`) end to end
//! against the in-memory `RedisStore` double: penetration blocked,
//! breakdown single-flight, pre-refresh, and double-delete.

use cache_domain::{CacheResult, EngineConfig, JsonCodec, MethodDescriptor, OperationType};
use cache_engine::CacheEngine;
use cache_testing::InMemoryRedisStore;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn engine() -> CacheEngine {
    let store: Arc<dyn cache_domain::RedisStore> = Arc::new(InMemoryRedisStore::new());
    CacheEngine::new(store, EngineConfig::default())
}

#[tokio::test]
async fn penetration_blocked_short_circuits_the_loader() {
    let engine = engine();
    let codec: JsonCodec<String> = JsonCodec::new("String");

    let mut descriptor = MethodDescriptor::default_for("users");
    descriptor.use_bloom_filter = true;
    engine.register("users", "u:1", OperationType::Cache, descriptor.clone());
    engine.register("users", "u:missing", OperationType::Cache, descriptor);

    engine
        .put("users", "u:1", &codec, &"present".to_string())
        .await
        .unwrap();

    let loader_calls = Arc::new(AtomicU32::new(0));
    let calls = loader_calls.clone();
    let result: Option<String> = engine
        .get_with_loader("users", "u:missing", Arc::new(codec), move || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Some("loaded".to_string())) as CacheResult<Option<String>>
            }
        })
        .await
        .unwrap();

    assert_eq!(result, None);
    assert_eq!(loader_calls.load(Ordering::SeqCst), 0);
    assert_eq!(engine.stats().protection.penetration_rejections, 1);
}

#[tokio::test]
async fn breakdown_single_flight_across_concurrent_misses() {
    let engine = engine();
    let codec = Arc::new(JsonCodec::<String>::new("String"));

    let mut descriptor = MethodDescriptor::default_for("hot");
    descriptor.internal_lock = true;
    descriptor.distributed_lock = true;
    engine.register("hot", "k:1", OperationType::Cache, descriptor);

    let loader_calls = Arc::new(AtomicU32::new(0));

    let mut handles = Vec::new();
    for _ in 0..50 {
        let engine = engine.clone();
        let codec = codec.clone();
        let calls = loader_calls.clone();
        handles.push(tokio::spawn(async move {
            engine
                .get_with_loader("hot", "k:1", codec, move || {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(15)).await;
                        Ok(Some("hot-value".to_string())) as CacheResult<Option<String>>
                    }
                })
                .await
                .unwrap()
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    assert!(results.iter().all(|r| r.as_deref() == Some("hot-value")));
    assert_eq!(loader_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn pre_refresh_fires_on_near_expiry_hit_and_does_not_duplicate() {
    let engine = engine();
    let codec = Arc::new(JsonCodec::<String>::new("String"));

    let mut descriptor = MethodDescriptor::default_for("refresh-me");
    descriptor.enable_pre_refresh = true;
    descriptor.pre_refresh_threshold = 0.9;
    descriptor.ttl_seconds = 2;
    engine.register("refresh-me", "k:1", OperationType::Cache, descriptor);

    engine
        .put_with_ttl("refresh-me", "k:1", codec.as_ref(), &"v1".to_string(), 2)
        .await
        .unwrap();

    // Threshold 0.9 fires once elapsed/total >= 0.1, i.e. ~200ms into a 2s TTL.
    tokio::time::sleep(Duration::from_millis(400)).await;

    let loader_calls = Arc::new(AtomicU32::new(0));

    // Two back-to-back GETs both observe the near-expiry hit; the in-flight
    // map should collapse them into at most one refresh job.
    for _ in 0..2 {
        let calls = loader_calls.clone();
        let _: Option<String> = engine
            .get_with_loader("refresh-me", "k:1", codec.clone(), move || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Some("v2".to_string())) as CacheResult<Option<String>>
                }
            })
            .await
            .unwrap();
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(loader_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn evict_double_delete_removes_a_stale_concurrent_write() {
    let engine = engine();
    let codec: JsonCodec<String> = JsonCodec::new("String");

    engine
        .put("stale", "k:1", &codec, &"original".to_string())
        .await
        .unwrap();

    engine.evict("stale", "k:1").await.unwrap();

    // A loader racing with the first delete writes a stale value back in.
    engine
        .put("stale", "k:1", &codec, &"stale-write".to_string())
        .await
        .unwrap();

    // The scheduled delayed delete (default 1s) should remove it.
    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert_eq!(engine.get("stale", "k:1", &codec).await.unwrap(), None);
}

#[tokio::test]
async fn evict_is_idempotent() {
    let engine = engine();
    let codec: JsonCodec<String> = JsonCodec::new("String");
    engine
        .put("idempotent", "k:1", &codec, &"v".to_string())
        .await
        .unwrap();

    engine.evict("idempotent", "k:1").await.unwrap();
    engine.evict("idempotent", "k:1").await.unwrap();

    assert_eq!(engine.get("idempotent", "k:1", &codec).await.unwrap(), None);
}

#[tokio::test]
async fn put_if_absent_passes_through_without_breakdown_protection() {
    let engine = engine();
    let codec: JsonCodec<String> = JsonCodec::new("String");

    let first = engine
        .put_if_absent("absent", "k:1", &codec, &"first".to_string())
        .await
        .unwrap();
    assert_eq!(first, None);

    let second = engine
        .put_if_absent("absent", "k:1", &codec, &"second".to_string())
        .await
        .unwrap();
    assert_eq!(second, Some("first".to_string()));
}

#[tokio::test]
async fn clear_removes_every_key_under_the_cache_name() {
    let engine = engine();
    let codec: JsonCodec<String> = JsonCodec::new("String");

    engine.put("batch", "a", &codec, &"1".to_string()).await.unwrap();
    engine.put("batch", "b", &codec, &"2".to_string()).await.unwrap();

    engine.clear("batch").await.unwrap();

    assert_eq!(engine.get("batch", "a", &codec).await.unwrap(), None);
    assert_eq!(engine.get("batch", "b", &codec).await.unwrap(), None);
}

#[tokio::test]
async fn ttl_zero_uses_configured_default_and_expires() {
    let store: Arc<dyn cache_domain::RedisStore> = Arc::new(InMemoryRedisStore::new());
    let mut config = EngineConfig::default();
    config.default_ttl_seconds = 1;
    let engine = CacheEngine::new(store, config);
    let codec: JsonCodec<String> = JsonCodec::new("String");

    // `default_for` sets ttl_seconds: 0, i.e. "use the configured default".
    let descriptor = MethodDescriptor::default_for("ttl-default");
    assert_eq!(descriptor.ttl_seconds, 0);
    engine.register("ttl-default", "k:1", OperationType::Cache, descriptor);

    engine
        .put("ttl-default", "k:1", &codec, &"v".to_string())
        .await
        .unwrap();
    assert_eq!(
        engine.get("ttl-default", "k:1", &codec).await.unwrap(),
        Some("v".to_string())
    );

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(engine.get("ttl-default", "k:1", &codec).await.unwrap(), None);
}

#[tokio::test]
async fn health_reports_backend_reachability() {
    let engine = engine();
    let health = engine.health().await;
    assert!(health.backend_reachable);
}

#[tokio::test]
async fn shutdown_drains_in_flight_pre_refresh_before_returning() {
    let engine = engine();
    let codec = Arc::new(JsonCodec::<String>::new("String"));

    let mut descriptor = MethodDescriptor::default_for("draining");
    descriptor.enable_pre_refresh = true;
    descriptor.pre_refresh_threshold = 0.9;
    descriptor.ttl_seconds = 2;
    engine.register("draining", "k:1", OperationType::Cache, descriptor);

    engine
        .put_with_ttl("draining", "k:1", codec.as_ref(), &"v1".to_string(), 2)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    let refreshed = Arc::new(AtomicU32::new(0));
    let calls = refreshed.clone();
    let _: Option<String> = engine
        .get_with_loader("draining", "k:1", codec.clone(), move || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(Some("v2".to_string())) as CacheResult<Option<String>>
            }
        })
        .await
        .unwrap();

    engine.shutdown(Duration::from_secs(1)).await;
    assert_eq!(refreshed.load(Ordering::SeqCst), 1);
}
