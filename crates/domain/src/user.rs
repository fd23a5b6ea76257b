use time::Duration;

use crate::value_objects::{PasswordHash, Timestamp, UserEmail, UserId, Username};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: Username,
    pub email: UserEmail,
    #[serde(skip_serializing)] // 密码字段不暴露给客户端
    pub password: PasswordHash,
    pub failed_login_attempts: u32,
    pub locked_until: Option<Timestamp>,
    pub last_login_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// 一次密码校验失败之后账户的状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginFailure {
    /// 计数已增加，账户仍可继续尝试
    Counted,
    /// 本次失败使计数达到阈值，账户被锁定至给定时间
    Locked { until: Timestamp },
}

impl User {
    pub fn register(
        id: UserId,
        username: Username,
        email: UserEmail,
        password: PasswordHash,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            username,
            email,
            password,
            failed_login_attempts: 0,
            locked_until: None,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 锁定窗口内一律拒绝登录，与提交的密码是否正确无关。
    pub fn is_locked(&self, now: Timestamp) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }

    /// 记录一次密码错误。
    ///
    /// 已过期的锁定会先被清除并重新开始计数，因此每个锁定窗口都需要连续
    /// `max_attempts` 次失败才能触发。
    pub fn record_failed_login(
        &mut self,
        max_attempts: u32,
        lock_duration: Duration,
        now: Timestamp,
    ) -> LoginFailure {
        if self.locked_until.is_some_and(|until| until <= now) {
            self.locked_until = None;
            self.failed_login_attempts = 0;
        }

        self.failed_login_attempts = self.failed_login_attempts.saturating_add(1);
        self.updated_at = now;

        if self.failed_login_attempts >= max_attempts {
            // 超出可表示范围时锁到最大日期
            let until = now
                .checked_add(lock_duration)
                .unwrap_or_else(|| time::Date::MAX.midnight().assume_utc());
            self.locked_until = Some(until);
            LoginFailure::Locked { until }
        } else {
            LoginFailure::Counted
        }
    }

    pub fn record_successful_login(&mut self, now: Timestamp) {
        self.failed_login_attempts = 0;
        self.locked_until = None;
        self.last_login_at = Some(now);
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;
    use uuid::Uuid;

    fn sample_user(now: Timestamp) -> User {
        User::register(
            UserId::from(Uuid::new_v4()),
            Username::parse("alice").unwrap(),
            UserEmail::parse("a@x.com").unwrap(),
            PasswordHash::new("hash").unwrap(),
            now,
        )
    }

    #[test]
    fn locks_when_threshold_reached() {
        let now = datetime!(2025-01-01 12:00 UTC);
        let mut user = sample_user(now);

        for _ in 0..4 {
            assert_eq!(
                user.record_failed_login(5, Duration::minutes(15), now),
                LoginFailure::Counted
            );
        }
        let outcome = user.record_failed_login(5, Duration::minutes(15), now);
        assert_eq!(
            outcome,
            LoginFailure::Locked {
                until: now + Duration::minutes(15)
            }
        );
        assert!(user.is_locked(now + Duration::minutes(14)));
        assert!(!user.is_locked(now + Duration::minutes(15)));
    }

    #[test]
    fn oversized_lock_duration_saturates() {
        let now = datetime!(2025-01-01 12:00 UTC);
        let mut user = sample_user(now);

        let outcome = user.record_failed_login(1, Duration::MAX, now);
        let LoginFailure::Locked { until } = outcome else {
            panic!("expected lock, got {outcome:?}");
        };
        assert_eq!(until.date(), time::Date::MAX);
        assert!(user.is_locked(datetime!(9000-01-01 0:00 UTC)));
    }

    #[test]
    fn expired_lock_restarts_the_counter() {
        let now = datetime!(2025-01-01 12:00 UTC);
        let mut user = sample_user(now);
        for _ in 0..3 {
            user.record_failed_login(3, Duration::minutes(1), now);
        }
        assert!(user.is_locked(now));

        let later = now + Duration::minutes(2);
        assert_eq!(
            user.record_failed_login(3, Duration::minutes(1), later),
            LoginFailure::Counted
        );
        assert_eq!(user.failed_login_attempts, 1);
        assert!(!user.is_locked(later));
    }

    #[test]
    fn success_resets_lockout_state() {
        let now = datetime!(2025-01-01 12:00 UTC);
        let mut user = sample_user(now);
        user.record_failed_login(5, Duration::minutes(15), now);
        user.record_successful_login(now);

        assert_eq!(user.failed_login_attempts, 0);
        assert_eq!(user.locked_until, None);
        assert_eq!(user.last_login_at, Some(now));
    }
}
