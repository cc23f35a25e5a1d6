use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use uuid::Uuid;

use super::{Failure, Outcome, ServiceError, ServiceResult, settle};
use crate::{
    db::{DbPool, UnitOfWork},
    models::{CreateUser, Role, User, normalize_email},
};

/// Service layer for user operations
#[derive(Clone)]
pub struct UserService {
    db: DbPool,
    cancel: CancellationToken,
}

impl UserService {
    pub fn new(db: DbPool) -> Self {
        Self {
            db,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Register a user and grant them an application role.
    ///
    /// The user row and the role grant commit together. A concurrent
    /// registration of the same email that wins the race surfaces as
    /// [`Failure::EmailInUse`].
    #[instrument(skip(self, input), fields(role = %input.role))]
    pub async fn register(&self, input: CreateUser) -> ServiceResult<Outcome<User>> {
        let mut uow = self.db.unit_of_work(self.cancel.clone());
        uow.begin_transaction().await?;
        let result = self.register_in(&mut uow, input).await;

        match settle(&mut uow, result).await {
            Err(ServiceError::Database(e)) if e.is_unique_violation() => {
                Ok(Err(Failure::EmailInUse))
            }
            other => other,
        }
    }

    async fn register_in(
        &self,
        uow: &mut UnitOfWork,
        input: CreateUser,
    ) -> ServiceResult<Outcome<User>> {
        let Some(role) = uow.roles().get_by_name(&input.role).await? else {
            return Ok(Err(Failure::RoleNotFound));
        };
        if uow.users().find_by_email(&input.email).await?.is_some() {
            return Ok(Err(Failure::EmailInUse));
        }

        let user = User {
            id: Uuid::new_v4(),
            email: normalize_email(&input.email),
            display_name: input.display_name,
            created_at: Utc::now(),
        };
        uow.users().add(user.clone());
        uow.roles().assign(user.id, role.id);

        info!(user_id = %user.id, "User registered");
        Ok(Ok(user))
    }

    pub async fn get(&self, user_id: Uuid) -> ServiceResult<Option<User>> {
        let mut uow = self.db.unit_of_work(self.cancel.clone());
        Ok(uow.users().get(user_id).await?)
    }

    /// Case-insensitive lookup.
    pub async fn find_by_email(&self, email: &str) -> ServiceResult<Option<User>> {
        let mut uow = self.db.unit_of_work(self.cancel.clone());
        Ok(uow.users().find_by_email(email).await?)
    }

    pub async fn roles(&self, user_id: Uuid) -> ServiceResult<Vec<Role>> {
        let mut uow = self.db.unit_of_work(self.cancel.clone());
        Ok(uow.users().roles_for(user_id).await?)
    }
}
