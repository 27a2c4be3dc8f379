//! Behavior every `LocationStore` implementation must share.
//!
//! Each scenario runs against both the in-memory simulation and an
//! in-memory SQLite database.

use std::sync::Arc;

use time::Duration;
use time::macros::datetime;

use gpslog_store::{
    ChangeEvent, Clock, Error, LocationStore, ManualClock, MemoryStore, SqliteStore,
};
use gpslog_types::{Coordinate, Fix, LocationRecord, RecordId};

fn stores() -> Vec<(&'static str, Arc<dyn LocationStore>, Arc<ManualClock>)> {
    let start = datetime!(2024-05-01 12:00 UTC);

    let memory_clock = Arc::new(ManualClock::new(start));
    let memory = MemoryStore::with_clock(memory_clock.clone());

    let sqlite_clock = Arc::new(ManualClock::new(start));
    let sqlite = SqliteStore::open_in_memory_with_clock(sqlite_clock.clone()).unwrap();

    vec![
        ("memory", Arc::new(memory), memory_clock),
        ("sqlite", Arc::new(sqlite), sqlite_clock),
    ]
}

async fn record(store: &dyn LocationStore, lat: f64, lon: f64) -> LocationRecord {
    store
        .append(Fix::now(lat, lon).unwrap())
        .await
        .unwrap()
        .acknowledged()
        .await
        .unwrap()
}

#[tokio::test]
async fn append_then_list() {
    for (name, store, _) in stores() {
        let a = record(store.as_ref(), 35.0, 139.0).await;
        let b = record(store.as_ref(), 35.1, 139.1).await;

        let listed = store.list_all().await.unwrap();
        assert_eq!(listed, vec![a, b], "{name}");
        assert_eq!(store.count().await.unwrap(), 2, "{name}");
        assert!(store.pending().await.unwrap().is_empty(), "{name}");
    }
}

#[tokio::test]
async fn invalid_coordinate_is_rejected_before_queueing() {
    for (name, store, _) in stores() {
        let fix = Fix {
            coordinate: Coordinate {
                latitude: 0.0,
                longitude: 181.0,
            },
            captured_at: datetime!(2024-05-01 12:00 UTC),
        };

        let err = store.append(fix).await.unwrap_err();
        assert!(matches!(err, Error::InvalidCoordinate { longitude, .. } if longitude == 181.0), "{name}");
        assert!(store.pending().await.unwrap().is_empty(), "{name}");
        assert_eq!(store.count().await.unwrap(), 0, "{name}");
    }
}

#[tokio::test]
async fn delete_missing_record_is_not_found() {
    for (name, store, _) in stores() {
        let kept = record(store.as_ref(), 1.0, 1.0).await;
        let err = store.delete(&RecordId::new("missing")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)), "{name}");
        assert_eq!(store.list_all().await.unwrap(), vec![kept], "{name}");
    }
}

#[tokio::test]
async fn delete_one_record() {
    for (name, store, _) in stores() {
        let a = record(store.as_ref(), 1.0, 1.0).await;
        let b = record(store.as_ref(), 2.0, 2.0).await;

        store.delete(a.id.as_ref().unwrap()).await.unwrap();
        assert_eq!(store.list_all().await.unwrap(), vec![b], "{name}");
    }
}

#[tokio::test]
async fn delete_all_then_list_is_empty() {
    for (name, store, _) in stores() {
        for i in 0..5 {
            record(store.as_ref(), i as f64, 0.0).await;
        }
        assert_eq!(store.delete_all().await.unwrap(), 5, "{name}");
        assert!(store.list_all().await.unwrap().is_empty(), "{name}");
        assert_eq!(store.delete_all().await.unwrap(), 0, "{name}");
    }
}

#[tokio::test]
async fn retention_keeps_only_recent_records() {
    for (name, store, clock) in stores() {
        let now = clock.now();

        // Place records at 48h, 25h and 23h before `now`
        clock.set(now - Duration::hours(48));
        record(store.as_ref(), 48.0, 0.0).await;
        clock.set(now - Duration::hours(25));
        record(store.as_ref(), 25.0, 0.0).await;
        clock.set(now - Duration::hours(23));
        let recent = record(store.as_ref(), 23.0, 0.0).await;
        clock.set(now);

        let removed = store.delete_older_than(now - Duration::hours(24)).await.unwrap();
        assert_eq!(removed, 2, "{name}");
        assert_eq!(store.list_all().await.unwrap(), vec![recent], "{name}");

        // Idempotent
        let removed = store.delete_older_than(now - Duration::hours(24)).await.unwrap();
        assert_eq!(removed, 0, "{name}");
    }
}

#[tokio::test]
async fn equal_timestamps_keep_insertion_order() {
    for (name, store, _) in stores() {
        // The manual clock does not move, so all three share created_at
        let first = record(store.as_ref(), 1.0, 0.0).await;
        let second = record(store.as_ref(), 2.0, 0.0).await;
        let third = record(store.as_ref(), 3.0, 0.0).await;
        assert_eq!(first.created_at, third.created_at);

        assert_eq!(store.list_all().await.unwrap(), vec![first, second, third], "{name}");
    }
}

#[tokio::test]
async fn second_subscription_is_rejected() {
    for (name, store, _) in stores() {
        let sub = store.subscribe(false).await.unwrap();
        assert!(matches!(store.subscribe(false).await, Err(Error::AlreadySubscribed)), "{name}");

        store.unsubscribe(sub.id()).await;
        let again = store.subscribe(true).await.unwrap();
        store.unsubscribe(again.id()).await;
        // Unsubscribing twice is harmless
        store.unsubscribe(again.id()).await;
    }
}

#[tokio::test]
async fn feed_includes_pending_writes_only_when_asked() {
    for (name, store, _) in stores() {
        let mut with_pending = store.subscribe(true).await.unwrap();
        let added = record(store.as_ref(), 1.0, 2.0).await;

        assert!(
            matches!(with_pending.next().await, Some(ChangeEvent::PendingWrite { .. })),
            "{name}"
        );
        assert_eq!(with_pending.next().await, Some(ChangeEvent::Added { record: added }), "{name}");
        store.unsubscribe(with_pending.id()).await;

        let mut committed_only = store.subscribe(false).await.unwrap();
        let added = record(store.as_ref(), 3.0, 4.0).await;
        assert_eq!(committed_only.next().await, Some(ChangeEvent::Added { record: added }), "{name}");
    }
}

#[tokio::test]
async fn unsubscribe_ends_the_feed() {
    for (name, store, _) in stores() {
        let mut sub = store.subscribe(false).await.unwrap();
        store.unsubscribe(sub.id()).await;
        record(store.as_ref(), 1.0, 1.0).await;
        assert_eq!(sub.next().await, None, "{name}");
    }
}
