//! 服务测试共用的夹具

use std::sync::Arc;

use async_trait::async_trait;
use domain::{PasswordHash, User, UserEmail, UserId, Username};
use uuid::Uuid;

use crate::{
    clock::{Clock, FixedClock},
    memory::MemoryStore,
    password::{PasswordHasher, PasswordHasherError},
    repository::UserRepository,
};

/// 不做真正哈希的实现，避免 bcrypt 拖慢单元测试
pub struct PlainHasher;

#[async_trait]
impl PasswordHasher for PlainHasher {
    async fn hash(&self, plaintext: &str) -> Result<PasswordHash, PasswordHasherError> {
        PasswordHash::new(format!("plain:{plaintext}"))
            .map_err(|err| PasswordHasherError::hash_error(err.to_string()))
    }

    async fn verify(
        &self,
        plaintext: &str,
        hashed: &PasswordHash,
    ) -> Result<bool, PasswordHasherError> {
        Ok(hashed.as_str() == format!("plain:{plaintext}"))
    }
}

pub fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(time::OffsetDateTime::now_utc()))
}

pub async fn seed_user(store: &MemoryStore, clock: &FixedClock, email: &str, password: &str) -> User {
    let user = User::register(
        UserId::from(Uuid::new_v4()),
        Username::parse(format!("user_{}", email.split('@').next().unwrap_or(""))).unwrap(),
        UserEmail::parse(email).unwrap(),
        PasswordHash::new(format!("plain:{password}")).unwrap(),
        clock.now(),
    );
    store.create(user).await.unwrap()
}
