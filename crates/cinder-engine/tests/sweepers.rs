mod common;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use cinder_engine::{spawn_sweepers, DestructionScheduler, SweepConfig};
use cinder_store::models::now;
use cinder_store::{MemoryStore, Store};

use common::insert_due_at;

/// Long intervals: after the first tick only `wake()` runs a pass.
fn slow_config() -> SweepConfig {
    SweepConfig {
        expiry_interval_secs: 3600,
        incident_interval_secs: 3600,
        log_interval_secs: 3600,
        ..SweepConfig::default()
    }
}

async fn wait_deleted(store: &MemoryStore, id: &str) -> bool {
    for _ in 0..100 {
        if let Some(msg) = store.get_message(id).await.unwrap() {
            if msg.is_deleted {
                return true;
            }
        }
        tokio::time::sleep(StdDuration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn first_tick_and_wake_destroy_expired() {
    let store = Arc::new(MemoryStore::new());
    let scheduler = Arc::new(DestructionScheduler::new(store.clone()));
    let stale = insert_due_at(store.as_ref(), now() - Duration::seconds(5)).await;

    let sweepers = spawn_sweepers(scheduler, &slow_config());
    assert!(wait_deleted(&store, &stale.id).await);

    let next = insert_due_at(store.as_ref(), now() - Duration::milliseconds(1)).await;
    sweepers.wake();
    assert!(wait_deleted(&store, &next.id).await);

    tokio::time::timeout(StdDuration::from_secs(5), sweepers.shutdown())
        .await
        .expect("sweepers stop promptly");
}

#[tokio::test]
async fn loop_outlives_store_outage() {
    let store = Arc::new(MemoryStore::new());
    let scheduler = Arc::new(DestructionScheduler::new(store.clone()));
    let stale = insert_due_at(store.as_ref(), now() - Duration::seconds(5)).await;

    store.set_available(false);
    let sweepers = spawn_sweepers(scheduler, &slow_config());
    tokio::time::sleep(StdDuration::from_millis(200)).await;

    store.set_available(true);
    sweepers.wake();
    assert!(wait_deleted(&store, &stale.id).await);

    tokio::time::timeout(StdDuration::from_secs(5), sweepers.shutdown())
        .await
        .expect("sweepers stop promptly");
}

#[tokio::test]
async fn shutdown_without_work() {
    let store = Arc::new(MemoryStore::new());
    let scheduler = Arc::new(DestructionScheduler::new(store.clone()));
    let sweepers = spawn_sweepers(scheduler, &SweepConfig::default());
    tokio::time::timeout(StdDuration::from_secs(5), sweepers.shutdown())
        .await
        .expect("sweepers stop promptly");
    assert!(store.recent_system_logs(10).await.unwrap().is_empty());
}
