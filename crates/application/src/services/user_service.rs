use std::sync::Arc;

use domain::{RepositoryError, User, UserEmail, UserId, Username};
use tracing::info;
use uuid::Uuid;

use crate::{
    clock::Clock, error::ApplicationError, password::PasswordHasher, repository::UserRepository,
};

#[derive(Debug, Clone)]
pub struct RegisterUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

pub struct UserServiceDependencies {
    pub user_repository: Arc<dyn UserRepository>,
    pub password_hasher: Arc<dyn PasswordHasher>,
    pub clock: Arc<dyn Clock>,
}

pub struct UserService {
    deps: UserServiceDependencies,
}

impl UserService {
    pub fn new(deps: UserServiceDependencies) -> Self {
        Self { deps }
    }

    pub async fn register(&self, request: RegisterUserRequest) -> Result<User, ApplicationError> {
        let username = Username::parse(request.username)?;
        let email = UserEmail::parse(request.email)?;

        if self
            .deps
            .user_repository
            .find_by_email(&email)
            .await?
            .is_some()
        {
            return Err(ApplicationError::EmailAlreadyExists);
        }

        let password_hash = self.deps.password_hasher.hash(&request.password).await?;

        let now = self.deps.clock.now();
        let user = User::register(
            UserId::from(Uuid::new_v4()),
            username,
            email,
            password_hash,
            now,
        );

        // 并发注册同一邮箱时由唯一约束兜底
        let stored = self
            .deps
            .user_repository
            .create(user)
            .await
            .map_err(|err| match err {
                RepositoryError::Conflict => ApplicationError::EmailAlreadyExists,
                other => other.into(),
            })?;

        info!(user_id = %stored.id, "新用户注册");
        Ok(stored)
    }

    pub async fn profile(&self, user_id: UserId) -> Result<User, ApplicationError> {
        self.deps
            .user_repository
            .find_by_id(user_id)
            .await?
            .ok_or(ApplicationError::NotFound)
    }
}
