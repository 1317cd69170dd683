//! Engine behavior over an unreliable store

use aps_core::{ExperimentSettings, ManualClock};
use aps_experiment::bucketing;
use aps_experiment::{ExperimentEngine, ExperimentError, ExperimentId, ExperimentStatus, TrackOutcome};
use aps_test_utils::{ab_config, manual_clock, FlakyExperimentStore};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

async fn started(name: &str) -> (ExperimentEngine, Arc<FlakyExperimentStore>, ExperimentId, ManualClock) {
    let clock = manual_clock();
    let store = Arc::new(FlakyExperimentStore::new());
    let engine = ExperimentEngine::with_clock(store.clone(), ExperimentSettings::default(), clock.shared());
    let id = engine.create_experiment(ab_config(name)).await.unwrap();
    engine.start(id).await.unwrap();
    (engine, store, id, clock)
}

#[tokio::test]
async fn stale_snapshot_keeps_serving_during_outage() {
    let (engine, store, id, clock) = started("hero").await;
    let before = engine.get_variant("u1", "hero").await.unwrap();
    let allocation = engine.experiment(id).await.unwrap().allocation;

    store.set_failing(true);
    clock.advance(Duration::from_secs(6 * 60));

    assert_eq!(engine.get_variant("u1", "hero").await, Some(before));
    // Nothing can be persisted, so new subjects get the computed variant.
    let expected = bucketing::assign("u2", &id, &allocation).map(str::to_string);
    assert_eq!(engine.get_variant("u2", "hero").await, expected);
}

#[tokio::test]
async fn recovered_store_is_picked_up_on_next_refresh() {
    let (engine, store, _id, clock) = started("hero").await;
    engine.get_variant("u1", "hero").await.unwrap();

    store.set_failing(true);
    clock.advance(Duration::from_secs(6 * 60));
    assert!(engine.refresh().await.is_err());

    store.set_failing(false);
    assert_eq!(engine.refresh().await.unwrap(), 1);
    assert!(engine.get_variant("u3", "hero").await.is_some());
}

#[tokio::test]
async fn store_failure_drops_tracked_event() {
    let (engine, store, _id, _clock) = started("hero").await;
    engine.get_variant("u1", "hero").await.unwrap();

    store.set_failing(true);
    assert_eq!(
        engine.track_event("u1", "hero", "conversion", json!({})).await,
        TrackOutcome::Dropped
    );

    store.set_failing(false);
    assert_eq!(
        engine.track_event("u1", "hero", "conversion", json!({})).await,
        TrackOutcome::Recorded
    );
}

#[tokio::test]
async fn lifecycle_errors_surface_while_store_is_down() {
    let (engine, store, id, _clock) = started("hero").await;
    store.set_failing(true);
    assert!(engine.pause(id).await.is_err());
    assert!(engine.get_results(id).await.is_err());
}

#[tokio::test]
async fn uneven_split_holds_over_many_subjects() {
    let clock = manual_clock();
    let store = Arc::new(FlakyExperimentStore::new());
    let engine = ExperimentEngine::with_clock(store, ExperimentSettings::default(), clock.shared());
    let id = engine
        .create_experiment(
            ab_config("pricing")
                .with_allocation("control", 70.0)
                .with_allocation("treatment", 30.0),
        )
        .await
        .unwrap();
    engine.start(id).await.unwrap();

    for i in 0..10_000 {
        engine.get_variant(&format!("subject-{i}"), "pricing").await.unwrap();
    }

    let results = engine.get_results(id).await.unwrap();
    assert_eq!(results.total_users, 10_000);
    let control = results.variants.iter().find(|v| v.variant == "control").unwrap();
    assert!(
        (6_700..=7_300).contains(&control.assigned_users),
        "control got {}",
        control.assigned_users
    );
}

#[tokio::test(start_paused = true)]
async fn racing_pause_cannot_reopen_completed_experiment() {
    let (engine, store, id, _clock) = started("hero").await;
    store.set_read_delay(Duration::from_millis(50));

    let (completed, paused) = tokio::join!(engine.complete(id), engine.pause(id));
    assert!(completed.is_ok());
    assert!(matches!(paused, Err(ExperimentError::IllegalTransition { .. })));
    assert_eq!(engine.experiment(id).await.unwrap().status, ExperimentStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn racing_complete_after_pause_still_completes() {
    let (engine, store, id, _clock) = started("hero").await;
    store.set_read_delay(Duration::from_millis(50));

    let (paused, completed) = tokio::join!(engine.pause(id), engine.complete(id));
    assert!(paused.is_ok());
    assert!(completed.is_ok());
    assert_eq!(engine.experiment(id).await.unwrap().status, ExperimentStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn concurrent_starts_allow_one_running_name() {
    let clock = manual_clock();
    let store = Arc::new(FlakyExperimentStore::new());
    let engine = ExperimentEngine::with_clock(store.clone(), ExperimentSettings::default(), clock.shared());
    let first = engine.create_experiment(ab_config("hero")).await.unwrap();
    let second = engine.create_experiment(ab_config("hero")).await.unwrap();
    store.set_read_delay(Duration::from_millis(50));

    let (a, b) = tokio::join!(engine.start(first), engine.start(second));
    assert!(a.is_ok());
    assert!(matches!(b, Err(ExperimentError::NameInUse(name)) if name == "hero"));

    store.set_read_delay(Duration::ZERO);
    let running: Vec<_> = engine
        .list_experiments()
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.status == ExperimentStatus::Running)
        .collect();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].id, first);
}
