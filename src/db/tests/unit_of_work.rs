//! Tests for UnitOfWork transaction semantics

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::harness::{create_test_db, meeting_fixture, seed_user, user_fixture};
use crate::db::{DbError, DbPool};

pub async fn test_commit_makes_writes_visible(db: &DbPool) {
    let organizer = seed_user(db, "org@example.com").await;
    let meeting = meeting_fixture(organizer.id, "Kickoff");

    let mut uow = db.unit_of_work(CancellationToken::new());
    uow.begin_transaction().await.unwrap();
    assert!(uow.in_transaction());
    uow.meetings().add(meeting.clone());
    assert_eq!(uow.pending_writes(), 1);
    uow.commit().await.unwrap();
    assert!(!uow.in_transaction());
    assert_eq!(uow.pending_writes(), 0);
    drop(uow);

    let mut reader = db.unit_of_work(CancellationToken::new());
    assert!(reader.meetings().get(meeting.id).await.unwrap().is_some());
}

pub async fn test_rollback_discards_writes(db: &DbPool) {
    let organizer = seed_user(db, "org@example.com").await;
    let meeting = meeting_fixture(organizer.id, "Kickoff");

    let mut uow = db.unit_of_work(CancellationToken::new());
    uow.begin_transaction().await.unwrap();
    uow.meetings().add(meeting.clone());
    uow.save_changes().await.unwrap();
    // Flushed writes are visible inside the transaction.
    assert!(uow.meetings().get(meeting.id).await.unwrap().is_some());
    uow.rollback().await.unwrap();

    assert!(uow.meetings().get(meeting.id).await.unwrap().is_none());
}

pub async fn test_failed_flush_rolls_back_whole_transaction(db: &DbPool) {
    let organizer = seed_user(db, "org@example.com").await;
    let meeting = meeting_fixture(organizer.id, "Kickoff");
    let mut clash = user_fixture("org@example.com");
    clash.id = Uuid::new_v4();

    let mut uow = db.unit_of_work(CancellationToken::new());
    uow.begin_transaction().await.unwrap();
    uow.meetings().add(meeting.clone());
    uow.users().add(clash);
    let err = uow.commit().await.expect_err("Duplicate email should fail");
    assert!(err.is_unique_violation());
    assert!(!uow.in_transaction());

    assert!(uow.meetings().get(meeting.id).await.unwrap().is_none());
}

pub async fn test_begin_twice_is_noop(db: &DbPool) {
    let organizer = seed_user(db, "org@example.com").await;
    let meeting = meeting_fixture(organizer.id, "Kickoff");

    let mut uow = db.unit_of_work(CancellationToken::new());
    uow.begin_transaction().await.unwrap();
    uow.meetings().add(meeting.clone());
    uow.begin_transaction().await.unwrap();
    // The staged write survives the second begin.
    assert_eq!(uow.pending_writes(), 1);
    uow.commit().await.unwrap();

    assert!(uow.meetings().get(meeting.id).await.unwrap().is_some());
}

pub async fn test_rollback_without_transaction_is_noop(db: &DbPool) {
    let mut uow = db.unit_of_work(CancellationToken::new());
    uow.rollback().await.unwrap();
    assert!(!uow.in_transaction());
}

pub async fn test_complete_autocommits_each_write(db: &DbPool) {
    let organizer = seed_user(db, "org@example.com").await;
    let meeting = meeting_fixture(organizer.id, "Kickoff");

    let mut uow = db.unit_of_work(CancellationToken::new());
    uow.meetings().add(meeting.clone());
    let written = uow.complete().await.unwrap();
    assert_eq!(written, 1);
    drop(uow);

    let mut reader = db.unit_of_work(CancellationToken::new());
    assert!(reader.meetings().get(meeting.id).await.unwrap().is_some());
}

pub async fn test_drop_with_open_transaction_rolls_back(db: &DbPool) {
    let organizer = seed_user(db, "org@example.com").await;
    let meeting = meeting_fixture(organizer.id, "Kickoff");

    {
        let mut uow = db.unit_of_work(CancellationToken::new());
        uow.begin_transaction().await.unwrap();
        uow.meetings().add(meeting.clone());
        uow.save_changes().await.unwrap();
    }

    let mut reader = db.unit_of_work(CancellationToken::new());
    assert!(reader.meetings().get(meeting.id).await.unwrap().is_none());
}

pub async fn test_cancelled_token_fails_reads(db: &DbPool) {
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut uow = db.unit_of_work(cancel);
    let result = uow.meetings().get(Uuid::new_v4()).await;
    assert!(matches!(result, Err(DbError::Cancelled)));
}

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

    sqlite_test!(test_commit_makes_writes_visible);
    sqlite_test!(test_rollback_discards_writes);
    sqlite_test!(test_failed_flush_rolls_back_whole_transaction);
    sqlite_test!(test_begin_twice_is_noop);
    sqlite_test!(test_rollback_without_transaction_is_noop);
    sqlite_test!(test_complete_autocommits_each_write);
    sqlite_test!(test_drop_with_open_transaction_rolls_back);
    sqlite_test!(test_cancelled_token_fails_reads);
}
