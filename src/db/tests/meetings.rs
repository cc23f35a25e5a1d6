//! Tests for MeetingRepo

use chrono::{Duration, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::harness::{
    create_test_db, seed_canceled_meeting, seed_meeting, seed_participant, seed_user,
};
use crate::{
    db::DbPool,
    models::{Attachment, MeetingState},
};

fn attachment_for(meeting_id: Uuid, uploaded_by: Uuid, name: &str) -> Attachment {
    Attachment {
        id: Uuid::new_v4(),
        meeting_id,
        file_name: name.to_string(),
        content_type: "application/pdf".to_string(),
        size_bytes: 42,
        object_key: Attachment::object_key_for(meeting_id, name),
        uploaded_by,
        uploaded_at: Utc::now(),
    }
}

pub async fn test_get_returns_inserted_meeting(db: &DbPool) {
    let organizer = seed_user(db, "org@example.com").await;
    let meeting = seed_meeting(db, &organizer, "Planning").await;

    let mut uow = db.unit_of_work(CancellationToken::new());
    let fetched = uow
        .meetings()
        .get(meeting.id)
        .await
        .expect("Failed to get meeting")
        .expect("Meeting should exist");

    assert_eq!(fetched.id, meeting.id);
    assert_eq!(fetched.name, "Planning");
    assert_eq!(fetched.organizer_id, organizer.id);
    assert_eq!(fetched.state(), MeetingState::Active);
    assert_eq!(fetched.start_at, meeting.start_at);
}

pub async fn test_get_missing_returns_none(db: &DbPool) {
    let mut uow = db.unit_of_work(CancellationToken::new());
    let fetched = uow.meetings().get(Uuid::new_v4()).await.unwrap();
    assert!(fetched.is_none());
}

pub async fn test_canceled_meeting_is_persisted(db: &DbPool) {
    let organizer = seed_user(db, "org@example.com").await;
    let canceled_at = Utc::now() - Duration::days(3);
    let meeting = seed_canceled_meeting(db, &organizer, "Retro", canceled_at).await;

    let mut uow = db.unit_of_work(CancellationToken::new());
    let fetched = uow.meetings().get(meeting.id).await.unwrap().unwrap();
    assert!(fetched.is_canceled);
    assert_eq!(fetched.canceled_at, Some(canceled_at));
    assert_eq!(fetched.state(), MeetingState::Canceled);
}

pub async fn test_list_for_user_only_returns_own_meetings(db: &DbPool) {
    let alice = seed_user(db, "alice@example.com").await;
    let bob = seed_user(db, "bob@example.com").await;
    let a = seed_meeting(db, &alice, "Alice's").await;
    let b = seed_meeting(db, &bob, "Bob's").await;
    seed_participant(db, &b, &alice).await;

    let mut uow = db.unit_of_work(CancellationToken::new());
    let alice_meetings = uow.meetings().list_for_user(alice.id).await.unwrap();
    let bob_meetings = uow.meetings().list_for_user(bob.id).await.unwrap();

    let ids: Vec<Uuid> = alice_meetings.iter().map(|m| m.id).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&a.id));
    assert!(ids.contains(&b.id));
    assert_eq!(bob_meetings.len(), 1);
    assert_eq!(bob_meetings[0].id, b.id);
}

pub async fn test_list_expired_uses_strict_cutoff(db: &DbPool) {
    let organizer = seed_user(db, "org@example.com").await;
    let cutoff = Utc::now() - Duration::days(30);

    let old = seed_canceled_meeting(db, &organizer, "Old", cutoff - Duration::seconds(1)).await;
    seed_canceled_meeting(db, &organizer, "Boundary", cutoff).await;
    seed_canceled_meeting(db, &organizer, "Recent", cutoff + Duration::days(1)).await;
    seed_meeting(db, &organizer, "Active").await;

    let mut uow = db.unit_of_work(CancellationToken::new());
    let expired = uow.meetings().list_expired(cutoff, None).await.unwrap();

    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].meeting.id, old.id);
}

pub async fn test_list_expired_orders_oldest_first_and_limits(db: &DbPool) {
    let organizer = seed_user(db, "org@example.com").await;
    let now = Utc::now();
    let newer = seed_canceled_meeting(db, &organizer, "Newer", now - Duration::days(40)).await;
    let oldest = seed_canceled_meeting(db, &organizer, "Oldest", now - Duration::days(90)).await;
    let middle = seed_canceled_meeting(db, &organizer, "Middle", now - Duration::days(60)).await;

    let mut uow = db.unit_of_work(CancellationToken::new());
    let all = uow
        .meetings()
        .list_expired(now - Duration::days(30), None)
        .await
        .unwrap();
    let ids: Vec<Uuid> = all.iter().map(|e| e.meeting.id).collect();
    assert_eq!(ids, vec![oldest.id, middle.id, newer.id]);

    let limited = uow
        .meetings()
        .list_expired(now - Duration::days(30), Some(2))
        .await
        .unwrap();
    let ids: Vec<Uuid> = limited.iter().map(|e| e.meeting.id).collect();
    assert_eq!(ids, vec![oldest.id, middle.id]);
}

pub async fn test_list_expired_loads_attachments(db: &DbPool) {
    let organizer = seed_user(db, "org@example.com").await;
    let now = Utc::now();
    let with_files =
        seed_canceled_meeting(db, &organizer, "With files", now - Duration::days(45)).await;
    let without_files =
        seed_canceled_meeting(db, &organizer, "Without files", now - Duration::days(40)).await;

    let mut uow = db.unit_of_work(CancellationToken::new());
    uow.attachments()
        .add(attachment_for(with_files.id, organizer.id, "a.pdf"));
    uow.attachments()
        .add(attachment_for(with_files.id, organizer.id, "b.pdf"));
    uow.complete().await.unwrap();

    let expired = uow
        .meetings()
        .list_expired(now - Duration::days(30), None)
        .await
        .unwrap();

    assert_eq!(expired.len(), 2);
    assert_eq!(expired[0].meeting.id, with_files.id);
    assert_eq!(expired[0].attachments.len(), 2);
    assert_eq!(expired[1].meeting.id, without_files.id);
    assert!(expired[1].attachments.is_empty());
}

pub async fn test_remove_range_deletes_meetings(db: &DbPool) {
    let organizer = seed_user(db, "org@example.com").await;
    let now = Utc::now();
    let a = seed_canceled_meeting(db, &organizer, "A", now - Duration::days(50)).await;
    let b = seed_canceled_meeting(db, &organizer, "B", now - Duration::days(50)).await;
    let keep = seed_meeting(db, &organizer, "Keep").await;

    let mut uow = db.unit_of_work(CancellationToken::new());
    uow.begin_transaction().await.unwrap();
    uow.participants().remove_for_meetings(vec![a.id, b.id]);
    uow.meetings().remove_range(vec![a.id, b.id]);
    uow.commit().await.unwrap();

    assert!(uow.meetings().get(a.id).await.unwrap().is_none());
    assert!(uow.meetings().get(b.id).await.unwrap().is_none());
    assert!(uow.meetings().get(keep.id).await.unwrap().is_some());
    assert!(uow.participants().list(a.id).await.unwrap().is_empty());
}

pub async fn test_remove_range_empty_stages_nothing(db: &DbPool) {
    let mut uow = db.unit_of_work(CancellationToken::new());
    uow.meetings().remove_range(Vec::new());
    assert_eq!(uow.pending_writes(), 0);
}

// ============================================================================
// SQLite Tests
// ============================================================================

mod sqlite_tests {
    macro_rules! sqlite_test {
        ($name:ident) => {
            #[tokio::test]
            async fn $name() {
                let db = super::create_test_db().await;
                super::$name(&db).await;
            }
        };
    }

    sqlite_test!(test_get_returns_inserted_meeting);
    sqlite_test!(test_get_missing_returns_none);
    sqlite_test!(test_canceled_meeting_is_persisted);
    sqlite_test!(test_list_for_user_only_returns_own_meetings);
    sqlite_test!(test_list_expired_uses_strict_cutoff);
    sqlite_test!(test_list_expired_orders_oldest_first_and_limits);
    sqlite_test!(test_list_expired_loads_attachments);
    sqlite_test!(test_remove_range_deletes_meetings);
    sqlite_test!(test_remove_range_empty_stages_nothing);
}
