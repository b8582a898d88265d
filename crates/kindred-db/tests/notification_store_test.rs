//! Integration tests for the PostgreSQL notification store.
//!
//! Require a reachable database (`DATABASE_URL`); run with
//! `cargo test -p kindred-db -- --ignored`.

use kindred_core::{
    Error, EventType, MarkOutcome, NewNotification, NotificationRepository, NotificationStatus,
    TreeEvent,
};
use kindred_db::test_fixtures::{unique, TestDatabase};

async fn setup() -> TestDatabase {
    dotenvy::dotenv().ok();
    TestDatabase::new().await
}

fn row_for(event: &TreeEvent, recipient: &str) -> NewNotification {
    NewNotification::for_recipient(event, recipient).expect("event has a tree")
}

#[tokio::test]
#[ignore]
async fn test_insert_if_absent_is_idempotent() {
    let test_db = setup().await;
    let repo = &test_db.db.notifications;
    let recipient = unique("user");
    let event = TreeEvent::new(EventType::TreeCreated, unique("tree"), "actor");

    assert!(repo.insert_if_absent(&row_for(&event, &recipient)).await.unwrap());
    // Redelivery of the same event
    assert!(!repo.insert_if_absent(&row_for(&event, &recipient)).await.unwrap());

    let rows = repo.list_for_recipient(&recipient).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].event_id, event.event_id());
    assert_eq!(rows[0].status, NotificationStatus::Unread);
}

#[tokio::test]
#[ignore]
async fn test_list_unread_newest_first() {
    let test_db = setup().await;
    let repo = &test_db.db.notifications;
    let recipient = unique("user");
    let tree = unique("tree");

    let older = TreeEvent::new(EventType::TreeCreated, &tree, "actor");
    repo.insert_if_absent(&row_for(&older, &recipient)).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let newer = TreeEvent::new(EventType::TreeStructureModified, &tree, "actor");
    repo.insert_if_absent(&row_for(&newer, &recipient)).await.unwrap();
    let read = TreeEvent::new(EventType::TreeDeleted, &tree, "actor");
    repo.insert_if_absent(&row_for(&read, &recipient)).await.unwrap();
    repo.set_status(&recipient, read.event_id(), NotificationStatus::Read)
        .await
        .unwrap();

    let unread = repo.list_unread(&recipient).await.unwrap();
    let ids: Vec<&str> = unread.iter().map(|n| n.event_id.as_str()).collect();
    assert_eq!(ids, vec![newer.event_id(), older.event_id()]);
}

#[tokio::test]
#[ignore]
async fn test_set_status_outcomes() {
    let test_db = setup().await;
    let repo = &test_db.db.notifications;
    let recipient = unique("user");
    let event = TreeEvent::new(EventType::TreeCreated, unique("tree"), "actor");
    repo.insert_if_absent(&row_for(&event, &recipient)).await.unwrap();

    let first = repo
        .set_status(&recipient, event.event_id(), NotificationStatus::Read)
        .await
        .unwrap();
    let second = repo
        .set_status(&recipient, event.event_id(), NotificationStatus::Read)
        .await
        .unwrap();
    assert_eq!(first, MarkOutcome::Updated);
    assert_eq!(second, MarkOutcome::Unchanged);

    let row = repo.find(&recipient, event.event_id()).await.unwrap().unwrap();
    assert_eq!(row.status, NotificationStatus::Read);
    assert!(row.updated_at >= row.created_at);

    let missing = repo
        .set_status(&recipient, "no-such-event", NotificationStatus::Read)
        .await;
    assert!(matches!(missing, Err(Error::NotFound(_))));
}

#[tokio::test]
#[ignore]
async fn test_bulk_status_and_delete() {
    let test_db = setup().await;
    let repo = &test_db.db.notifications;
    let recipient = unique("user");
    let tree = unique("tree");

    let a = TreeEvent::new(EventType::TreeCreated, &tree, "actor");
    let b = TreeEvent::new(EventType::TreeDeleted, &tree, "actor");
    repo.insert_if_absent(&row_for(&a, &recipient)).await.unwrap();
    repo.insert_if_absent(&row_for(&b, &recipient)).await.unwrap();

    let mut read = repo.mark_all_read(&recipient).await.unwrap();
    read.sort();
    let mut expected = vec![a.event_id().to_string(), b.event_id().to_string()];
    expected.sort();
    assert_eq!(read, expected);
    assert!(repo.mark_all_read(&recipient).await.unwrap().is_empty());

    let unread = repo
        .mark_unread_batch(&recipient, &[a.event_id().to_string()])
        .await
        .unwrap();
    assert_eq!(unread, vec![a.event_id().to_string()]);

    assert_eq!(repo.delete_all_read(&recipient).await.unwrap(), 1);
    assert!(repo.delete(&recipient, a.event_id()).await.unwrap());
    assert!(!repo.delete(&recipient, a.event_id()).await.unwrap());
    assert!(repo.list_for_recipient(&recipient).await.unwrap().is_empty());
}
