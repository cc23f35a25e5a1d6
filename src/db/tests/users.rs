//! Tests for UserRepo and RoleRepo

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::harness::{create_test_db, seed_user, user_fixture};
use crate::db::DbPool;

pub async fn test_find_by_email_is_case_insensitive(db: &DbPool) {
    let user = seed_user(db, "Carol@Example.com").await;

    let mut uow = db.unit_of_work(CancellationToken::new());
    let found = uow
        .users()
        .find_by_email("  CAROL@example.COM ")
        .await
        .unwrap()
        .expect("User should be found");
    assert_eq!(found.id, user.id);
    assert_eq!(found.email, "carol@example.com");
}

pub async fn test_find_by_emails_skips_unknown(db: &DbPool) {
    let a = seed_user(db, "a@example.com").await;
    let b = seed_user(db, "b@example.com").await;

    let mut uow = db.unit_of_work(CancellationToken::new());
    let found = uow
        .users()
        .find_by_emails(&[
            "A@example.com".to_string(),
            "nobody@example.com".to_string(),
            "b@example.com".to_string(),
            "a@example.com".to_string(),
        ])
        .await
        .unwrap();

    let ids: Vec<Uuid> = found.iter().map(|u| u.id).collect();
    assert_eq!(ids, vec![a.id, b.id]);
}

pub async fn test_find_by_emails_empty_input(db: &DbPool) {
    let mut uow = db.unit_of_work(CancellationToken::new());
    assert!(uow.users().find_by_emails(&[]).await.unwrap().is_empty());
}

pub async fn test_duplicate_email_rejected(db: &DbPool) {
    seed_user(db, "dup@example.com").await;

    let mut uow = db.unit_of_work(CancellationToken::new());
    uow.users().add(user_fixture("DUP@example.com"));
    let err = uow.complete().await.expect_err("Duplicate email should fail");
    assert!(err.is_unique_violation());
}

pub async fn test_seeded_roles_and_assignment(db: &DbPool) {
    let user = seed_user(db, "member@example.com").await;

    let mut uow = db.unit_of_work(CancellationToken::new());
    let member = uow
        .roles()
        .get_by_name("Member")
        .await
        .unwrap()
        .expect("Member role is seeded");
    assert!(uow.roles().get_by_name("Admin").await.unwrap().is_some());
    assert!(uow.roles().get_by_name("Owner").await.unwrap().is_none());

    uow.roles().assign(user.id, member.id);
    // Assigning twice is ignored.
    uow.roles().assign(user.id, member.id);
    uow.complete().await.unwrap();

    let roles = uow.users().roles_for(user.id).await.unwrap();
    assert_eq!(roles, vec![member]);
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

    sqlite_test!(test_find_by_email_is_case_insensitive);
    sqlite_test!(test_find_by_emails_skips_unknown);
    sqlite_test!(test_find_by_emails_empty_input);
    sqlite_test!(test_duplicate_email_rejected);
    sqlite_test!(test_seeded_roles_and_assignment);
}
