//! The UI-facing write path, cache refresh and cached reads.

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use serde_json::json;
use shopsync::{
    clock::Clock,
    storage::keys,
    sync::{RefreshOutcome, RemoteError, SnapshotSource, SyncAction, WriteOutcome},
};

use crate::support::{harness, record, wait_until, widget, RemoteCall};

fn profile() -> shopsync::Record {
    record(json!({ "id": "user-1", "shop_id": "shop-1", "name": "Ada" }))
}

fn sale(n: i64, shop: &str) -> shopsync::Record {
    let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + ChronoDuration::minutes(n);
    record(json!({
        "id": format!("sale-{n}"),
        "shop_id": shop,
        "total": n,
        "created_at": at.to_rfc3339(),
    }))
}

// ============================================================================
// write
// ============================================================================

#[tokio::test]
async fn write_applies_directly_when_online_and_idle() {
    let h = harness(true);

    let outcome = h
        .engine
        .write("products", SyncAction::Insert, widget())
        .await
        .unwrap();

    let WriteOutcome::Applied(Some(stored)) = outcome else {
        panic!("expected a direct write, got {outcome:?}");
    };
    assert_eq!(stored.get("id"), Some(&json!("srv-1")));
    assert_eq!(h.engine.queue().len().unwrap(), 0);
    assert_eq!(h.remote.rows("products").len(), 1);
}

#[tokio::test]
async fn write_queues_while_offline() {
    let h = harness(false);

    let outcome = h
        .engine
        .write("products", SyncAction::Insert, widget())
        .await
        .unwrap();

    assert!(matches!(outcome, WriteOutcome::Queued(_)));
    assert_eq!(h.engine.queue().len().unwrap(), 1);
    assert!(h.remote.calls().is_empty());
}

#[tokio::test]
async fn write_queues_when_the_direct_call_fails() {
    let h = harness(true);
    h.remote.set_unreachable(true);

    let outcome = h
        .engine
        .write("products", SyncAction::Insert, widget())
        .await
        .unwrap();

    let WriteOutcome::Queued(op) = outcome else {
        panic!("expected the write to be queued");
    };
    assert_eq!(op.payload, widget());
    assert_eq!(h.engine.queue().list().unwrap(), vec![op]);
    assert_eq!(h.remote.writes().len(), 1, "only the direct attempt reached the remote");
}

#[tokio::test]
async fn write_never_overtakes_queued_work() {
    let h = harness(false);
    h.remote.seed("products", vec![record(json!({"id": "p1", "stock": 5}))]);
    h.engine
        .queue_sync(
            "products",
            SyncAction::Update,
            record(json!({"id": "p1", "stock": 4})),
        )
        .unwrap();

    h.connectivity.set_online(true);
    let outcome = h
        .engine
        .write(
            "products",
            SyncAction::Update,
            record(json!({"id": "p1", "stock": 3})),
        )
        .await
        .unwrap();
    assert!(matches!(outcome, WriteOutcome::Queued(_)));

    wait_until(|| h.engine.queue().len().unwrap() == 0).await;

    let writes = h.remote.writes();
    assert_eq!(writes.len(), 2);
    assert_eq!(
        writes[0],
        RemoteCall::Update {
            collection: "products".into(),
            id: "p1".into(),
            patch: record(json!({"stock": 4})),
        }
    );
    assert_eq!(h.remote.rows("products")[0].get("stock"), Some(&json!(3)));
}

#[tokio::test]
async fn queue_sync_drains_opportunistically_when_online() {
    let h = harness(true);

    h.engine
        .queue_sync("sales", SyncAction::Insert, record(json!({"total": 12})))
        .unwrap();

    wait_until(|| h.engine.queue().len().unwrap() == 0).await;
    assert_eq!(h.remote.rows("sales").len(), 1);
    assert_eq!(h.engine.get_status().unwrap().last_sync_at, Some(h.clock.now()));
}

// ============================================================================
// refresh_from_server
// ============================================================================

#[tokio::test]
async fn refresh_mirrors_shop_products_and_recent_sales() {
    let h = harness(true);
    h.engine.cache().set_profile(&profile()).unwrap();
    h.remote.seed(
        "products",
        vec![
            record(json!({"id": "p2", "name": "Zest", "shop_id": "shop-1"})),
            record(json!({"id": "p1", "name": "Apple", "shop_id": "shop-1"})),
            record(json!({"id": "p3", "name": "Other", "shop_id": "shop-2"})),
        ],
    );
    let mut sales: Vec<_> = (0..120).map(|n| sale(n, "shop-1")).collect();
    sales.push(sale(500, "shop-2"));
    h.remote.seed("sales", sales);

    let outcome = h.engine.refresh_from_server().await.unwrap();
    assert_eq!(
        outcome,
        RefreshOutcome::Refreshed {
            products: 2,
            sales: 100
        }
    );

    let products = h.engine.cache().products().unwrap();
    let names: Vec<_> = products.iter().map(|p| p["name"].clone()).collect();
    assert_eq!(names, vec![json!("Apple"), json!("Zest")]);

    let cached_sales = h.engine.cache().sales().unwrap();
    assert_eq!(cached_sales.len(), 100);
    assert_eq!(cached_sales[0]["id"], json!("sale-119"));
    assert_eq!(cached_sales[99]["id"], json!("sale-20"));

    assert_eq!(h.engine.cache().last_sync().unwrap(), Some(h.clock.now()));
    assert!(h.engine.queue().is_empty().unwrap());
}

#[tokio::test]
async fn refresh_is_skipped_offline_or_without_profile() {
    let h = harness(false);
    h.engine.cache().set_profile(&profile()).unwrap();
    assert_eq!(
        h.engine.refresh_from_server().await.unwrap(),
        RefreshOutcome::Offline
    );

    let h = harness(true);
    assert_eq!(
        h.engine.refresh_from_server().await.unwrap(),
        RefreshOutcome::NoProfile
    );
    assert!(h.remote.calls().is_empty());
}

#[tokio::test]
async fn failed_refresh_leaves_the_cache_untouched() {
    let h = harness(true);
    h.engine.cache().set_profile(&profile()).unwrap();
    let cached = vec![record(json!({"id": "old", "name": "Old", "shop_id": "shop-1"}))];
    h.engine.cache().set_products(&cached).unwrap();
    h.remote.seed(
        "products",
        vec![record(json!({"id": "new", "name": "New", "shop_id": "shop-1"}))],
    );
    h.remote.fail_when(|call| match call {
        RemoteCall::Query { collection } if collection == "sales" => {
            Some(RemoteError::new("502 bad gateway"))
        }
        _ => None,
    });

    let outcome = h.engine.refresh_from_server().await.unwrap();

    assert_eq!(
        outcome,
        RefreshOutcome::Failed {
            error: "502 bad gateway".into()
        }
    );
    assert_eq!(h.engine.cache().products().unwrap(), cached);
    assert_eq!(h.engine.cache().last_sync().unwrap(), None);
}

// ============================================================================
// Cached reads
// ============================================================================

#[tokio::test]
async fn products_come_from_the_cache_while_offline() {
    let h = harness(false);
    h.engine.cache().set_profile(&profile()).unwrap();
    h.engine
        .cache()
        .set_products(&[
            record(json!({"id": "p2", "name": "Bolt", "shop_id": "shop-1"})),
            record(json!({"id": "p1", "name": "Axle", "shop_id": "shop-1"})),
            record(json!({"id": "p9", "name": "Cog", "shop_id": "shop-9"})),
        ])
        .unwrap();

    let snapshot = h.engine.load_products().await.unwrap();

    assert_eq!(snapshot.source, SnapshotSource::Cache);
    let ids: Vec<_> = snapshot.records.iter().map(|r| r["id"].clone()).collect();
    assert_eq!(ids, vec![json!("p1"), json!("p2")]);
    assert!(h.remote.calls().is_empty());
    assert!(h.engine.queue().is_empty().unwrap());
}

#[tokio::test]
async fn reads_fall_back_to_the_cache_when_the_remote_fails() {
    let h = harness(true);
    h.engine
        .cache()
        .set_snapshot(keys::SALES, &[sale(1, "shop-1")])
        .unwrap();
    h.remote.set_unreachable(true);

    let snapshot = h
        .engine
        .load_collection(keys::SALES, &Default::default())
        .await
        .unwrap();

    assert_eq!(snapshot.source, SnapshotSource::Cache);
    assert_eq!(snapshot.records, vec![sale(1, "shop-1")]);
    assert!(h.engine.queue().is_empty().unwrap());
}

#[tokio::test]
async fn successful_reads_replace_the_snapshot() {
    let h = harness(true);
    h.engine
        .cache()
        .set_snapshot(keys::SALES, &[sale(1, "shop-1")])
        .unwrap();
    h.remote.seed("sales", vec![sale(2, "shop-1"), sale(3, "shop-1")]);

    let snapshot = h
        .engine
        .load_collection(keys::SALES, &Default::default())
        .await
        .unwrap();

    assert_eq!(snapshot.source, SnapshotSource::Remote);
    assert_eq!(snapshot.records.len(), 2);
    assert_eq!(h.engine.cache().sales().unwrap(), snapshot.records);
}

#[tokio::test]
async fn reading_a_collection_named_like_a_control_slot_keeps_the_queue() {
    let h = harness(true);
    let pending = h
        .engine
        .queue()
        .enqueue("sales", SyncAction::Insert, record(json!({"total": 8})))
        .unwrap();
    h.remote.seed(
        keys::SYNC_QUEUE,
        vec![record(json!({"id": 1, "status": "pending", "retry_count": 0}))],
    );

    let snapshot = h
        .engine
        .load_collection(keys::SYNC_QUEUE, &Default::default())
        .await
        .unwrap();
    assert_eq!(snapshot.source, SnapshotSource::Remote);
    assert_eq!(h.engine.queue().list().unwrap(), vec![pending]);

    h.connectivity.set_online(false);
    let cached = h
        .engine
        .load_collection(keys::SYNC_QUEUE, &Default::default())
        .await
        .unwrap();
    assert_eq!(cached.source, SnapshotSource::Cache);
    assert_eq!(cached.records, snapshot.records);

    h.connectivity.set_online(true);
    let outcome = h.engine.manual_sync().await;
    assert_eq!(outcome.report().unwrap().processed.len(), 1);
}
