// ABOUTME: Log forwarder tests against in-memory change log and central log stores
// ABOUTME: Covers SENT marking, retry flagging and diagnostic stripping

mod common;

use changelog_replicator::sync::{
    Action, DedupChannel, EntryStatus, ForwardStats, ForwardStatus, LogForwarder,
};
use common::{at, entry, key, Stores};

async fn forward(stores: &Stores, batch_size: usize) -> ForwardStats {
    LogForwarder::new(&stores.log, &stores.central, batch_size)
        .run_batch(&mut DedupChannel::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_forwards_unsent_entries_oldest_first() {
    let stores = Stores::new();
    let mut done = entry(1002, "P01", Action::Update, at(1, 9, 5));
    done.status = EntryStatus::Success;
    done.attempt = 2;
    stores.log.push(done);
    stores
        .log
        .push(entry(1001, "P01", Action::Insert, at(1, 9, 1)));

    let stats = forward(&stores, 100).await;

    assert_eq!(stats.seen, 2);
    assert_eq!(stats.sent, 2);
    assert_eq!(stats.failed, 0);

    let central = stores.central.entries();
    assert_eq!(central[0].key, key(1001, "P01"));
    assert_eq!(central[1].key, key(1002, "P01"));
    assert_eq!(central[1].status, EntryStatus::Success);
    assert_eq!(central[1].attempt, 2);

    for e in stores.log.entries() {
        assert_eq!(e.forward_status, ForwardStatus::Sent);
    }

    let again = forward(&stores, 100).await;
    assert_eq!(again.seen, 0);
    assert_eq!(stores.central.entries().len(), 2);
}

#[tokio::test]
async fn test_failed_entry_is_flagged_and_batch_continues() {
    let stores = Stores::new();
    let mut first = entry(1001, "P01", Action::Insert, at(1, 9, 1));
    first.message = Some("Data synced successfully 1001-P01".to_string());
    stores.log.push(first);
    stores
        .log
        .push(entry(1002, "P01", Action::Insert, at(1, 9, 2)));
    *stores.central.reject.lock().unwrap() = Some(key(1001, "P01"));

    let stats = forward(&stores, 100).await;

    assert_eq!(stats.sent, 1);
    assert_eq!(stats.failed, 1);

    let failed = stores.log.get(0);
    assert_eq!(failed.forward_status, ForwardStatus::Retry);
    let message = failed.message.unwrap();
    assert!(message.starts_with("Data synced successfully 1001-P01 | [forward] : "));
    assert!(message.contains("value too long"), "{}", message);
    assert_eq!(stores.log.get(1).forward_status, ForwardStatus::Sent);
}

#[tokio::test]
async fn test_retry_strips_forward_diagnostics() {
    let stores = Stores::new();
    let mut first = entry(1001, "P01", Action::Insert, at(1, 9, 1));
    first.message = Some("Data synced successfully 1001-P01".to_string());
    stores.log.push(first);
    *stores.central.reject.lock().unwrap() = Some(key(1001, "P01"));
    forward(&stores, 100).await;
    forward(&stores, 100).await;

    *stores.central.reject.lock().unwrap() = None;
    let stats = forward(&stores, 100).await;

    assert_eq!(stats.sent, 1);
    let central = stores.central.entries();
    assert_eq!(central.len(), 1);
    assert_eq!(
        central[0].message.as_deref(),
        Some("Data synced successfully 1001-P01")
    );
    assert_eq!(stores.log.get(0).forward_status, ForwardStatus::Sent);
}

#[tokio::test]
async fn test_forward_batch_size_limits_entries() {
    let stores = Stores::new();
    for id in 1..=3i64 {
        stores
            .log
            .push(entry(id, "P01", Action::Insert, at(1, 9, id as u32)));
    }

    let stats = forward(&stores, 2).await;

    assert_eq!(stats.seen, 2);
    assert_eq!(stores.log.get(2).forward_status, ForwardStatus::Unset);
}

#[tokio::test]
async fn test_entries_logged_in_the_same_second_are_marked_separately() {
    let stores = Stores::new();
    let mut inserted = entry(1001, "P01", Action::Insert, at(1, 9, 1));
    inserted.status = EntryStatus::Success;
    inserted.attempt = 1;
    stores.log.push(inserted);
    let mut updated = entry(1001, "P01", Action::Update, at(1, 9, 1));
    updated.status = EntryStatus::Success;
    updated.attempt = 2;
    stores.log.push(updated);

    let stats = forward(&stores, 1).await;

    assert_eq!(stats.sent, 1);
    assert_eq!(stores.log.get(0).forward_status, ForwardStatus::Sent);
    assert_eq!(stores.log.get(1).forward_status, ForwardStatus::Unset);

    forward(&stores, 1).await;
    let central = stores.central.entries();
    assert_eq!(central.len(), 2);
    assert_eq!(central[1].action, Action::Update);
    assert_eq!(stores.log.get(1).forward_status, ForwardStatus::Sent);
}
