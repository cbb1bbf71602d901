//! Periodic and connectivity-driven drains via `SyncScheduler`.

use std::time::Duration;

use serde_json::json;
use shopsync::{
    clock::Clock,
    sync::{SyncAction, SyncScheduler, SyncSchedulerOptions},
};

use crate::support::{harness, record, wait_until, widget, RemoteCall};

fn scheduler(h: &crate::support::Harness) -> SyncScheduler {
    SyncScheduler::new(
        h.engine.clone(),
        SyncSchedulerOptions {
            interval: Some(Duration::from_secs(30)),
        },
    )
}

#[tokio::test(start_paused = true)]
async fn offline_sale_is_pushed_after_reconnect() {
    let h = harness(false);
    let scheduler = scheduler(&h);
    assert!(scheduler.start());

    let op = h
        .engine
        .queue_sync("products", SyncAction::Insert, widget())
        .unwrap();
    assert_eq!(h.engine.get_status().unwrap().queue_length, 1);
    assert!(!h.engine.get_status().unwrap().is_online);

    // Nothing leaves the device while offline, however long we wait.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(h.remote.calls().is_empty());

    h.clock.advance(chrono::Duration::seconds(5));
    h.connectivity.set_online(true);
    wait_until(|| h.engine.queue().len().unwrap() == 0).await;

    assert_eq!(
        h.remote.writes(),
        vec![RemoteCall::Insert {
            collection: "products".into(),
            record: widget(),
        }]
    );
    let status = h.engine.get_status().unwrap();
    assert_eq!(status.queue_length, 0);
    assert!(status.is_online);
    let last_sync = status.last_sync_at.expect("last sync recorded");
    assert!(last_sync >= op.enqueued_at);
    assert_eq!(last_sync, h.clock.now());
}

#[tokio::test(start_paused = true)]
async fn periodic_tick_drains_while_online() {
    let h = harness(true);
    let scheduler = scheduler(&h);
    scheduler.start();
    tokio::time::sleep(Duration::from_millis(1)).await;

    // Enqueued without the opportunistic kick, so only the timer can drain it.
    h.engine
        .queue()
        .enqueue("sales", SyncAction::Insert, record(json!({"total": 4.5})))
        .unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.engine.queue().len().unwrap(), 1);

    tokio::time::sleep(Duration::from_secs(21)).await;
    assert_eq!(h.engine.queue().len().unwrap(), 0);
    assert_eq!(h.remote.writes().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn going_offline_suspends_the_tick() {
    let h = harness(true);
    let scheduler = scheduler(&h);
    scheduler.start();
    tokio::time::sleep(Duration::from_millis(1)).await;

    h.connectivity.set_online(false);
    h.engine
        .queue()
        .enqueue("sales", SyncAction::Insert, record(json!({"total": 4.5})))
        .unwrap();

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(h.engine.queue().len().unwrap(), 1);
    assert!(h.remote.calls().is_empty());
    assert!(scheduler.is_running());
}

#[tokio::test(start_paused = true)]
async fn start_and_stop_are_idempotent() {
    let h = harness(true);
    let scheduler = scheduler(&h);

    assert!(scheduler.start());
    assert!(!scheduler.start());
    assert!(scheduler.is_running());

    assert!(scheduler.stop());
    assert!(!scheduler.stop());
    tokio::task::yield_now().await;
    assert!(!scheduler.is_running());

    h.engine
        .queue()
        .enqueue("sales", SyncAction::Insert, record(json!({"total": 1})))
        .unwrap();
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(h.engine.queue().len().unwrap(), 1, "stopped scheduler must not drain");

    assert!(scheduler.start());
    wait_until(|| h.engine.queue().len().unwrap() == 0).await;
}

#[tokio::test(start_paused = true)]
async fn dropping_the_scheduler_stops_it() {
    let h = harness(true);
    {
        let scheduler = scheduler(&h);
        scheduler.start();
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    h.engine
        .queue()
        .enqueue("sales", SyncAction::Insert, record(json!({"total": 1})))
        .unwrap();
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(h.engine.queue().len().unwrap(), 1);
}

#[test]
fn start_without_runtime_is_refused() {
    let h = harness(true);
    let scheduler = scheduler(&h);
    assert!(!scheduler.start());
    assert!(!scheduler.is_running());
}
