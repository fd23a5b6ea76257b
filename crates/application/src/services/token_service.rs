//! 令牌服务
//!
//! 负责登录、刷新令牌轮换、登出以及暴力破解锁定策略。
//! 审计写入、旧令牌撤销和用户状态回写都是尽力而为：失败只记录日志，不影响主流程。

use std::sync::Arc;

use config::AuthConfig;
use domain::{
    AuditEvent, AuditEventKind, LoginFailure, NewRefreshToken, RefreshTokenId, Timestamp, User,
    UserEmail, UserId,
};
use tracing::{error, info, warn};

use crate::{
    clock::Clock,
    error::ApplicationError,
    password::PasswordHasher,
    repository::{AuditRepository, RefreshTokenRepository, UserRepository},
    token::{hash_refresh_token, RefreshTokenGenerator, TokenCodec, TokenError},
};

/// 请求来源信息，只用于审计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientMeta {
    pub ip: String,
    pub user_agent: String,
}

impl ClientMeta {
    pub fn new(ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            user_agent: user_agent.into(),
        }
    }
}

/// 访问令牌 + 刷新令牌
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// 刷新令牌有效期与锁定策略
#[derive(Debug, Clone, Copy)]
pub struct TokenPolicy {
    pub refresh_ttl: time::Duration,
    pub max_failed_logins: u32,
    pub lock_duration: time::Duration,
}

impl TokenPolicy {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            refresh_ttl: to_time(config.refresh_ttl()),
            max_failed_logins: config.max_failed_logins,
            lock_duration: to_time(config.lock_duration()),
        }
    }
}

fn to_time(duration: std::time::Duration) -> time::Duration {
    time::Duration::try_from(duration).unwrap_or(time::Duration::MAX)
}

pub struct TokenServiceDependencies {
    pub user_repository: Arc<dyn UserRepository>,
    pub refresh_token_repository: Arc<dyn RefreshTokenRepository>,
    pub audit_repository: Arc<dyn AuditRepository>,
    pub password_hasher: Arc<dyn PasswordHasher>,
    pub codec: TokenCodec,
    pub clock: Arc<dyn Clock>,
    pub policy: TokenPolicy,
}

pub struct TokenService {
    deps: TokenServiceDependencies,
    generator: RefreshTokenGenerator,
}

impl TokenService {
    pub fn new(deps: TokenServiceDependencies) -> Self {
        Self {
            deps,
            generator: RefreshTokenGenerator::new(),
        }
    }

    /// 校验访问令牌，返回用户 ID
    pub fn verify_access_token(&self, token: &str) -> Result<UserId, ApplicationError> {
        let now = self.deps.clock.now();
        self.deps.codec.verify(token, now).map_err(|err| {
            tracing::debug!(error = %err, "访问令牌校验失败");
            ApplicationError::InvalidCredentials
        })
    }

    pub async fn login(
        &self,
        email: &str,
        password: &str,
        meta: &ClientMeta,
    ) -> Result<TokenPair, ApplicationError> {
        let now = self.deps.clock.now();

        let lookup = match UserEmail::parse(email) {
            Ok(parsed) => self.deps.user_repository.find_by_email(&parsed).await,
            Err(_) => Ok(None),
        };
        let mut user = match lookup {
            Ok(Some(user)) => user,
            Ok(None) => {
                self.audit(None, AuditEventKind::LoginFail, email, meta, now)
                    .await;
                return Err(ApplicationError::InvalidCredentials);
            }
            Err(err) => {
                error!(error = %err, "登录时查询用户失败");
                self.audit(None, AuditEventKind::LoginFail, email, meta, now)
                    .await;
                return Err(ApplicationError::InvalidCredentials);
            }
        };

        // 锁定期内不校验密码
        if user.is_locked(now) {
            self.audit(Some(user.id), AuditEventKind::LoginFail, email, meta, now)
                .await;
            return Err(ApplicationError::InvalidCredentials);
        }

        let password_ok = self
            .deps
            .password_hasher
            .verify(password, &user.password)
            .await
            .unwrap_or_else(|err| {
                warn!(user_id = %user.id, error = %err, "密码哈希校验异常，按不匹配处理");
                false
            });

        if !password_ok {
            let outcome = user.record_failed_login(
                self.deps.policy.max_failed_logins,
                self.deps.policy.lock_duration,
                now,
            );
            if let LoginFailure::Locked { until } = outcome {
                warn!(user_id = %user.id, locked_until = %until, "连续登录失败，账户已锁定");
                self.audit(Some(user.id), AuditEventKind::AccountLocked, email, meta, now)
                    .await;
            }
            let user_id = user.id;
            self.persist_user(user).await;
            self.audit(Some(user_id), AuditEventKind::LoginFail, email, meta, now)
                .await;
            return Err(ApplicationError::InvalidCredentials);
        }

        user.record_successful_login(now);
        let user_id = user.id;
        self.persist_user(user).await;
        self.audit(Some(user_id), AuditEventKind::LoginSuccess, email, meta, now)
            .await;

        let (pair, _) = self.issue_pair(user_id, now).await?;
        info!(user_id = %user_id, "用户登录成功");
        Ok(pair)
    }

    /// 用旧刷新令牌换取新的一对令牌，旧令牌随即失效
    pub async fn refresh(
        &self,
        refresh_token: &str,
        meta: &ClientMeta,
    ) -> Result<TokenPair, ApplicationError> {
        let now = self.deps.clock.now();
        let token_hash = hash_refresh_token(refresh_token);

        let record = match self
            .deps
            .refresh_token_repository
            .find_live_by_hash(&token_hash, now)
            .await
        {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.audit(None, AuditEventKind::RefreshFail, "", meta, now)
                    .await;
                return Err(ApplicationError::InvalidCredentials);
            }
            Err(err) => {
                error!(error = %err, "查询刷新令牌失败");
                self.audit(None, AuditEventKind::RefreshFail, "", meta, now)
                    .await;
                return Err(ApplicationError::InvalidCredentials);
            }
        };

        // 先撤销再签发：撤销之后的签发失败不回滚，用户需要重新登录
        match self
            .deps
            .refresh_token_repository
            .revoke(record.id, now)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                // 并发请求已经用掉了这枚令牌
                self.audit(
                    Some(record.user_id),
                    AuditEventKind::RefreshFail,
                    "",
                    meta,
                    now,
                )
                .await;
                return Err(ApplicationError::InvalidCredentials);
            }
            Err(err) => {
                warn!(token_id = %record.id, error = %err, "撤销旧刷新令牌失败");
            }
        }

        let (pair, new_id) = self.issue_pair(record.user_id, now).await?;

        if let Err(err) = self
            .deps
            .refresh_token_repository
            .link_replacement(record.id, new_id)
            .await
        {
            warn!(token_id = %record.id, error = %err, "记录令牌轮换链失败");
        }

        let email = self.email_of(record.user_id).await;
        self.audit(
            Some(record.user_id),
            AuditEventKind::Refresh,
            &email,
            meta,
            now,
        )
        .await;

        Ok(pair)
    }

    /// 登出总是成功，不泄露令牌是否有效
    pub async fn logout(&self, refresh_token: &str, meta: &ClientMeta) {
        let now = self.deps.clock.now();
        let token_hash = hash_refresh_token(refresh_token);

        let record = match self
            .deps
            .refresh_token_repository
            .find_live_by_hash(&token_hash, now)
            .await
        {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(err) => {
                warn!(error = %err, "登出时查询刷新令牌失败");
                return;
            }
        };

        match self
            .deps
            .refresh_token_repository
            .revoke(record.id, now)
            .await
        {
            Ok(true) => {}
            Ok(false) => return,
            Err(err) => {
                warn!(token_id = %record.id, error = %err, "登出时撤销刷新令牌失败");
                return;
            }
        }

        let email = self.email_of(record.user_id).await;
        self.audit(
            Some(record.user_id),
            AuditEventKind::Logout,
            &email,
            meta,
            now,
        )
        .await;
    }

    async fn issue_pair(
        &self,
        user_id: UserId,
        now: Timestamp,
    ) -> Result<(TokenPair, RefreshTokenId), ApplicationError> {
        let access_token = self.deps.codec.sign(user_id, now)?;
        let refresh_token = self.generator.generate()?;
        let expires_at = now.checked_add(self.deps.policy.refresh_ttl).ok_or_else(|| {
            TokenError::Signing("refresh token expiry out of range".to_string())
        })?;

        let record = self
            .deps
            .refresh_token_repository
            .create(NewRefreshToken {
                user_id,
                token_hash: hash_refresh_token(&refresh_token),
                expires_at,
                created_at: now,
            })
            .await?;

        Ok((
            TokenPair {
                access_token,
                refresh_token,
            },
            record.id,
        ))
    }

    async fn persist_user(&self, user: User) {
        let user_id = user.id;
        if let Err(err) = self.deps.user_repository.update(user).await {
            error!(user_id = %user_id, error = %err, "更新用户登录状态失败");
        }
    }

    async fn email_of(&self, user_id: UserId) -> String {
        match self.deps.user_repository.find_by_id(user_id).await {
            Ok(Some(user)) => user.email.as_str().to_owned(),
            Ok(None) => String::new(),
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "查询审计邮箱失败");
                String::new()
            }
        }
    }

    async fn audit(
        &self,
        user_id: Option<UserId>,
        kind: AuditEventKind,
        email: &str,
        meta: &ClientMeta,
        now: Timestamp,
    ) {
        let event = AuditEvent {
            user_id,
            kind,
            email: email.to_owned(),
            ip: meta.ip.clone(),
            user_agent: meta.user_agent.clone(),
            created_at: now,
        };
        if let Err(err) = self.deps.audit_repository.append(event).await {
            warn!(kind = %kind, error = %err, "写入审计日志失败");
        }
    }
}
