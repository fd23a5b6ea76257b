use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value_objects::{Timestamp, UserId};

/// 审计事件类型，持久化为小写下划线字符串。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    LoginSuccess,
    LoginFail,
    AccountLocked,
    Refresh,
    RefreshFail,
    Logout,
}

impl AuditEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoginSuccess => "login_success",
            Self::LoginFail => "login_fail",
            Self::AccountLocked => "account_locked",
            Self::Refresh => "refresh",
            Self::RefreshFail => "refresh_fail",
            Self::Logout => "logout",
        }
    }
}

impl fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 只追加的审计记录，写入后不再修改。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    pub user_id: Option<UserId>,
    pub kind: AuditEventKind,
    pub email: String,
    pub ip: String,
    pub user_agent: String,
    pub created_at: Timestamp,
}
