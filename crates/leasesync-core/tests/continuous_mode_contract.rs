//! Contract Test: Continuous Mode & Shutdown
//!
//! Constraints verified:
//! - The first cycle runs immediately, later ones only when the trigger wakes
//! - The engine terminates on the shutdown signal and reports why
//! - The end of a trigger stream stops the engine cleanly
//! - Cycle errors never end the loop
//! - Polling wakes on a revision change, and reruns without one only after
//!   a retryable failure
//!
//! If this test fails, someone has broken scheduling or shutdown.

mod common;

use common::*;
use leasesync_core::cache::MemoryCacheStore;
use leasesync_core::engine::EngineEvent;
use leasesync_core::trigger::StreamTrigger;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

#[tokio::test]
async fn notifications_drive_cycles_until_shutdown() {
    let source = ScriptedSource::new(vec![binding("host1", 1)]);
    let applier = RecordingApplier::new();
    let cache = MemoryCacheStore::new();
    let (engine, mut event_rx) = engine_with(
        &source,
        RecordingApplier::sharing_counters_with(&applier),
        &cache,
        minimal_config(),
    );

    let (notify_tx, notify_rx) = mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let trigger = Box::new(StreamTrigger::from_receiver(notify_rx));

    let engine_handle =
        tokio::spawn(async move { engine.run_with_shutdown(trigger, Some(shutdown_rx)).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(applier.apply_call_count(), 1, "first cycle runs at startup");

    source.set_bindings(vec![binding("host1", 1), binding("host2", 2)]);
    notify_tx.send(()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(applier.apply_call_count(), 2);
    assert_eq!(cache.len().await, 2);

    shutdown_tx.send(()).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), engine_handle).await;
    assert!(result.is_ok(), "Engine should terminate within 5 seconds");
    assert!(result.unwrap().unwrap().is_ok());

    let events = drain_events(&mut event_rx);
    assert!(matches!(events.first(), Some(EngineEvent::Started { .. })));
    assert_eq!(
        events.last(),
        Some(&EngineEvent::Stopped {
            reason: "Shutdown signal".to_string()
        })
    );
}

#[tokio::test]
async fn trigger_end_stops_engine() {
    let source = ScriptedSource::new(vec![binding("host1", 1)]);
    let cache = MemoryCacheStore::new();
    let (engine, mut event_rx) = engine_with(&source, RecordingApplier::new(), &cache, minimal_config());

    let (notify_tx, notify_rx) = mpsc::channel::<()>(8);
    let (_shutdown_tx, shutdown_rx) = oneshot::channel();
    drop(notify_tx);

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        engine.run_with_shutdown(
            Box::new(StreamTrigger::from_receiver(notify_rx)),
            Some(shutdown_rx),
        ),
    )
    .await;

    assert!(result.is_ok(), "exhausted trigger must end the loop");
    assert!(result.unwrap().is_ok());
    assert_eq!(
        drain_events(&mut event_rx).last(),
        Some(&EngineEvent::Stopped {
            reason: "Trigger exhausted".to_string()
        })
    );
}

#[tokio::test]
async fn cycle_errors_do_not_stop_the_loop() {
    let source = ScriptedSource::new(vec![binding("host1", 1)]);
    let failing = FailingApplier::new(0);
    let cache = MemoryCacheStore::new();
    let (engine, _rx) = engine_with(
        &source,
        FailingApplier::sharing_counters_with(&failing),
        &cache,
        minimal_config(),
    );

    let (notify_tx, notify_rx) = mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let trigger = Box::new(StreamTrigger::from_receiver(notify_rx));

    let engine_handle =
        tokio::spawn(async move { engine.run_with_shutdown(trigger, Some(shutdown_rx)).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    notify_tx.send(()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(failing.apply_call_count(), 2);
    assert!(!engine_handle.is_finished(), "engine keeps running after failures");
    assert!(cache.is_empty().await);

    shutdown_tx.send(()).unwrap();
    assert!(engine_handle.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn polling_wakes_on_config_change() {
    let source = ScriptedSource::new(vec![binding("host1", 1)]);
    let applier = RecordingApplier::new();
    let cache = MemoryCacheStore::new();
    let mut config = minimal_config();
    config.engine.poll_interval_secs = 10;
    let (engine, _rx) = engine_with(
        &source,
        RecordingApplier::sharing_counters_with(&applier),
        &cache,
        config,
    );

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let trigger = Box::new(engine.polling_trigger());
    let engine_handle =
        tokio::spawn(async move { engine.run_with_shutdown(trigger, Some(shutdown_rx)).await });

    // t=15: one unchanged poll has passed
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(source.fetch_call_count(), 1);

    source.set_bindings(vec![binding("host1", 2)]);

    // t=25: the poll at t=20 saw the new revision
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(source.fetch_call_count(), 2);
    assert_eq!(applier.apply_call_count(), 2);
    assert_eq!(
        cache.snapshot().await.values().next().copied(),
        Some(binding("host1", 2).address)
    );

    shutdown_tx.send(()).unwrap();
    assert!(engine_handle.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn polling_reruns_only_after_retryable_failure() {
    // Retryable: apply failure reruns after one period without a change
    let source = ScriptedSource::new(vec![binding("host1", 1)]);
    let failing = FailingApplier::new(0);
    let mut config = minimal_config();
    config.engine.poll_interval_secs = 10;
    let (engine, _rx) = engine_with(
        &source,
        FailingApplier::sharing_counters_with(&failing),
        &MemoryCacheStore::new(),
        config.clone(),
    );

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let trigger = Box::new(engine.polling_trigger());
    let handle =
        tokio::spawn(async move { engine.run_with_shutdown(trigger, Some(shutdown_rx)).await });

    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(failing.apply_call_count(), 2);
    shutdown_tx.send(()).unwrap();
    assert!(handle.await.unwrap().is_ok());

    // Not retryable: a parse error waits for the next config change
    let broken = ScriptedSource::new(vec![binding("host1", 1)]);
    broken.set_parse_error(Some("staticmap has 2 ipaddrs"));
    let (engine, _rx) = engine_with(&broken, RecordingApplier::new(), &MemoryCacheStore::new(), config);

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let trigger = Box::new(engine.polling_trigger());
    let handle =
        tokio::spawn(async move { engine.run_with_shutdown(trigger, Some(shutdown_rx)).await });

    tokio::time::sleep(Duration::from_secs(35)).await;
    assert_eq!(broken.fetch_call_count(), 1, "no rerun without a config change");

    broken.set_parse_error(None);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(broken.fetch_call_count(), 2);

    shutdown_tx.send(()).unwrap();
    assert!(handle.await.unwrap().is_ok());
}
