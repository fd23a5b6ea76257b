//! 用户服务单元测试

use std::sync::Arc;

use domain::UserId;
use uuid::Uuid;

use super::test_support::{clock, PlainHasher};
use crate::{
    error::ApplicationError,
    memory::MemoryStore,
    services::{RegisterUserRequest, UserService, UserServiceDependencies},
};

fn service(store: Arc<MemoryStore>) -> UserService {
    UserService::new(UserServiceDependencies {
        user_repository: store,
        password_hasher: Arc::new(PlainHasher),
        clock: clock(),
    })
}

fn request(email: &str) -> RegisterUserRequest {
    RegisterUserRequest {
        username: "alice".to_string(),
        email: email.to_string(),
        password: "password123".to_string(),
    }
}

#[tokio::test]
async fn register_hashes_password() {
    let service = service(Arc::new(MemoryStore::new()));

    let user = service.register(request("a@x.com")).await.unwrap();

    assert_eq!(user.email.as_str(), "a@x.com");
    assert_ne!(user.password.as_str(), "password123");
    assert_eq!(user.failed_login_attempts, 0);
}

#[tokio::test]
async fn duplicate_email_is_reported_as_such() {
    let service = service(Arc::new(MemoryStore::new()));

    service.register(request("a@x.com")).await.unwrap();
    let second = service.register(request("a@x.com")).await;

    assert!(matches!(second, Err(ApplicationError::EmailAlreadyExists)));
}

#[tokio::test]
async fn invalid_input_is_a_domain_error() {
    let service = service(Arc::new(MemoryStore::new()));

    let result = service.register(request("not-an-email")).await;
    assert!(matches!(result, Err(ApplicationError::Domain(_))));
}

#[tokio::test]
async fn profile_of_missing_user_is_not_found() {
    let service = service(Arc::new(MemoryStore::new()));

    let result = service.profile(UserId::from(Uuid::new_v4())).await;
    assert!(matches!(result, Err(ApplicationError::NotFound)));
}
