#![cfg(feature = "inmem-store")]

use chrono::NaiveDate;
use pinmap::models::{PinColor, PinRecord};
use pinmap::store::inmem::InMemPinStore;
use pinmap::store::{PinLogStore, PinStore, StoreError, StoreEvent};

fn record(by: &str, created_at_ms: i64, color: PinColor) -> PinRecord {
    PinRecord {
        x_pct: Some(0.5),
        y_pct: Some(0.5),
        x: 400.0,
        y: 300.0,
        color,
        created_at: None,
        created_at_ms: Some(created_at_ms),
        created_by: Some(by.to_string()),
    }
}

// 2024-05-01T10:00:00Z
const MAY_FIRST: i64 = 1_714_557_600_000;

#[tokio::test]
async fn keys_are_assigned_in_creation_order() {
    let store = InMemPinStore::new();
    let a = store.create(record("alice", MAY_FIRST, PinColor::Red)).await.unwrap();
    let b = store.create(record("bob", MAY_FIRST + 1, PinColor::Blue)).await.unwrap();
    assert!(a < b);
    assert_eq!(store.len(), 2);
    assert!(store.contains(&a));
}

#[tokio::test]
async fn subscription_replays_existing_then_streams_changes() {
    let store = InMemPinStore::new();
    let first = store.create(record("alice", MAY_FIRST, PinColor::Red)).await.unwrap();

    let mut sub = store.subscribe().await.unwrap();
    assert_eq!(sub.initial.len(), 1);
    assert_eq!(sub.initial[0].0, first);

    let second = store.create(record("bob", MAY_FIRST, PinColor::Red)).await.unwrap();
    match sub.events.recv().await.unwrap() {
        StoreEvent::Added { id, record } => {
            assert_eq!(id, second);
            assert_eq!(record.created_by.as_deref(), Some("bob"));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    store.delete(&first).await.unwrap();
    assert_eq!(sub.events.recv().await.unwrap(), StoreEvent::Removed { id: first });
}

#[tokio::test]
async fn deleting_missing_record_is_not_found() {
    let store = InMemPinStore::new();
    let id = store.create(record("alice", MAY_FIRST, PinColor::Red)).await.unwrap();
    store.delete(&id).await.unwrap();
    assert_eq!(store.delete(&id).await, Err(StoreError::NotFound));
    assert!(store.is_empty());
}

#[tokio::test]
async fn log_is_filed_by_day_and_ignores_repeats() {
    let store = InMemPinStore::new();
    let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
    let rec = record("alice", MAY_FIRST, PinColor::Red);
    assert_eq!(rec.log_day(), Some(day));

    let id = store.create(rec.clone()).await.unwrap();
    store.append_log(day, &id, &rec).await.unwrap();
    store.append_log(day, &id, &rec).await.unwrap();
    // deleting the live record leaves the log alone
    store.delete(&id).await.unwrap();

    let entries = store.list_log(day).await.unwrap();
    assert_eq!(entries, vec![(id, rec)]);
    let other = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
    assert!(store.list_log(other).await.unwrap().is_empty());
}

#[tokio::test]
async fn snapshot_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
    let rec = record("alice", MAY_FIRST, PinColor::Purple);

    let id = {
        let store = InMemPinStore::with_snapshot(dir.path());
        let id = store.create(rec.clone()).await.unwrap();
        store.append_log(day, &id, &rec).await.unwrap();
        id
    };
    assert!(dir.path().join("pins.json").exists());

    let store = InMemPinStore::with_snapshot(dir.path());
    assert!(store.contains(&id));
    assert_eq!(store.list_log(day).await.unwrap().len(), 1);

    // keys keep increasing after a reload
    let next = store.create(record("bob", MAY_FIRST, PinColor::Red)).await.unwrap();
    assert!(next > id);
}

#[tokio::test]
async fn corrupt_snapshot_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("pins.json"), b"not json").unwrap();
    let store = InMemPinStore::with_snapshot(dir.path());
    assert!(store.is_empty());
}

#[tokio::test]
async fn clones_share_state_and_events() {
    let store = InMemPinStore::new();
    let other = store.clone();
    let mut sub = other.subscribe().await.unwrap();
    let id = store.create(record("alice", MAY_FIRST, PinColor::Red)).await.unwrap();
    assert!(other.contains(&id));
    assert!(matches!(sub.events.recv().await.unwrap(), StoreEvent::Added { id: got, .. } if got == id));
}
