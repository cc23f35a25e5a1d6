//! Tests for ParticipantRepo

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::harness::{create_test_db, seed_meeting, seed_participant, seed_user};
use crate::{
    db::DbPool,
    models::{Participant, ParticipantRole},
};

pub async fn test_organizer_row_is_listed(db: &DbPool) {
    let organizer = seed_user(db, "org@example.com").await;
    let meeting = seed_meeting(db, &organizer, "Standup").await;

    let mut uow = db.unit_of_work(CancellationToken::new());
    let participants = uow.participants().list(meeting.id).await.unwrap();

    assert_eq!(participants.len(), 1);
    assert_eq!(participants[0].user_id, organizer.id);
    assert_eq!(participants[0].role, ParticipantRole::Organizer);
}

pub async fn test_exists_and_get(db: &DbPool) {
    let organizer = seed_user(db, "org@example.com").await;
    let guest = seed_user(db, "guest@example.com").await;
    let stranger = seed_user(db, "stranger@example.com").await;
    let meeting = seed_meeting(db, &organizer, "Standup").await;
    seed_participant(db, &meeting, &guest).await;

    let mut uow = db.unit_of_work(CancellationToken::new());
    assert!(uow.participants().exists(meeting.id, guest.id).await.unwrap());
    assert!(!uow.participants().exists(meeting.id, stranger.id).await.unwrap());

    let row = uow
        .participants()
        .get(meeting.id, guest.id)
        .await
        .unwrap()
        .expect("Participant should exist");
    assert_eq!(row.role, ParticipantRole::Participant);
}

pub async fn test_duplicate_insert_is_unique_violation(db: &DbPool) {
    let organizer = seed_user(db, "org@example.com").await;
    let guest = seed_user(db, "guest@example.com").await;
    let meeting = seed_meeting(db, &organizer, "Standup").await;
    seed_participant(db, &meeting, &guest).await;

    let mut uow = db.unit_of_work(CancellationToken::new());
    uow.participants().add(Participant {
        meeting_id: meeting.id,
        user_id: guest.id,
        role: ParticipantRole::Participant,
        added_at: Utc::now(),
    });
    let err = uow.complete().await.expect_err("Duplicate should fail");
    assert!(err.is_unique_violation());
}

pub async fn test_remove_never_deletes_organizer(db: &DbPool) {
    let organizer = seed_user(db, "org@example.com").await;
    let guest = seed_user(db, "guest@example.com").await;
    let meeting = seed_meeting(db, &organizer, "Standup").await;
    seed_participant(db, &meeting, &guest).await;

    let mut uow = db.unit_of_work(CancellationToken::new());
    uow.participants().remove(meeting.id, guest.id);
    uow.participants().remove(meeting.id, organizer.id);
    uow.complete().await.unwrap();

    let remaining = uow.participants().list(meeting.id).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].user_id, organizer.id);
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

    sqlite_test!(test_organizer_row_is_listed);
    sqlite_test!(test_exists_and_get);
    sqlite_test!(test_duplicate_insert_is_unique_violation);
    sqlite_test!(test_remove_never_deletes_organizer);
}
