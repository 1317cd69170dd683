//! Remote-tier failure handling

use aps_cache::{CacheError, RemoteTier};
use aps_test_utils::{manual_clock, tiered_cache, FlakyRemoteTier};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const TTL: Duration = Duration::from_secs(300);

#[tokio::test]
async fn set_succeeds_while_remote_is_down() {
    let clock = manual_clock();
    let remote = Arc::new(FlakyRemoteTier::unavailable(&clock));
    let cache = tiered_cache(remote.clone(), &clock);

    assert!(cache.set("design:1", json!({"title": "draft"}), TTL).await);
    assert_eq!(cache.get("design:1").await, Some(json!({"title": "draft"})));

    let stats = cache.stats();
    assert_eq!(stats.local_hits, 1);
    assert_eq!(stats.remote_failures, 2);
    assert_eq!(remote.rejected(), 2);
}

#[tokio::test]
async fn reads_fall_back_to_local_copy() {
    let clock = manual_clock();
    let remote = Arc::new(FlakyRemoteTier::new(&clock));
    let cache = tiered_cache(remote.clone(), &clock);

    cache.set("k", json!(1), TTL).await;
    remote.set_failing(true);

    assert_eq!(cache.get("k").await, Some(json!(1)));
    assert_eq!(cache.stats().local_hits, 1);
}

#[tokio::test]
async fn local_hits_are_not_promoted() {
    let clock = manual_clock();
    let remote = Arc::new(FlakyRemoteTier::unavailable(&clock));
    let cache = tiered_cache(remote.clone(), &clock);

    cache.set("k", json!("local only"), TTL).await;
    remote.set_failing(false);

    assert_eq!(cache.get("k").await, Some(json!("local only")));
    assert!(remote.inner().get("k").await.unwrap().is_none());
}

#[tokio::test]
async fn invalidation_during_outage_still_clears_local() {
    let clock = manual_clock();
    let remote = Arc::new(FlakyRemoteTier::unavailable(&clock));
    let cache = tiered_cache(remote.clone(), &clock);

    cache.set("design:a", json!(1), TTL).await;
    cache.set("design:b", json!(1), TTL).await;
    cache.set("crystal:a", json!(1), TTL).await;

    assert_eq!(cache.invalidate("design:*").await.unwrap(), 2);
    assert_eq!(cache.get("design:a").await, None);
    assert_eq!(cache.get("crystal:a").await, Some(json!(1)));
}

#[tokio::test]
async fn invalid_pattern_is_the_only_surfaced_error() {
    let clock = manual_clock();
    let remote = Arc::new(FlakyRemoteTier::unavailable(&clock));
    let cache = tiered_cache(remote, &clock);

    assert!(matches!(
        cache.invalidate("").await,
        Err(CacheError::InvalidPattern { .. })
    ));
    assert!(!cache.delete("missing").await);
}

#[tokio::test]
async fn get_or_set_works_without_remote() {
    let clock = manual_clock();
    let remote = Arc::new(FlakyRemoteTier::unavailable(&clock));
    let cache = tiered_cache(remote, &clock);

    let first: Result<String, String> = cache
        .get_or_set("greeting", || async { Ok("hello".to_string()) }, TTL)
        .await;
    let second: Result<String, String> = cache
        .get_or_set("greeting", || async { Err("should not fetch".to_string()) }, TTL)
        .await;

    assert_eq!(first, Ok("hello".to_string()));
    assert_eq!(second, Ok("hello".to_string()));
}

#[tokio::test]
async fn invalidation_counts_keys_in_both_tiers_once() {
    let clock = manual_clock();
    let remote = Arc::new(FlakyRemoteTier::new(&clock));
    let cache = tiered_cache(remote.clone(), &clock);

    cache.set("design:a", json!(1), TTL).await;
    remote.set_failing(true);
    cache.set("design:b", json!(1), TTL).await;
    remote.set_failing(false);

    assert_eq!(cache.invalidate("design:*").await.unwrap(), 2);
    assert!(remote.inner().get("design:a").await.unwrap().is_none());
}
