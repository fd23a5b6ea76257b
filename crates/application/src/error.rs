use domain::{DomainError, RepositoryError};
use thiserror::Error;

use crate::{password::PasswordHasherError, token::TokenError};

#[derive(Debug, Error)]
pub enum ApplicationError {
    /// 认证失败。用户不存在、账户锁定、密码错误、刷新令牌无效都归为这一类，
    /// 对调用方不做区分。
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("forbidden")]
    Forbidden,
    #[error("not found")]
    NotFound,
    #[error("email already exists")]
    EmailAlreadyExists,
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(RepositoryError),
    #[error("password error: {0}")]
    Password(#[from] PasswordHasherError),
    #[error("token error: {0}")]
    Token(#[from] TokenError),
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound => ApplicationError::NotFound,
            other => ApplicationError::Repository(other),
        }
    }
}
