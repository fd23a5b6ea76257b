use crate::value_objects::{RefreshTokenId, Timestamp, UserId};

/// 刷新令牌记录。只保存令牌的单向哈希，明文只在签发时返回给客户端一次。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshToken {
    pub id: RefreshTokenId,
    pub user_id: UserId,
    pub token_hash: String,
    pub expires_at: Timestamp,
    pub revoked_at: Option<Timestamp>,
    pub replaced_by: Option<RefreshTokenId>,
    pub created_at: Timestamp,
}

impl RefreshToken {
    /// 未撤销且未过期
    pub fn is_live(&self, now: Timestamp) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRefreshToken {
    pub user_id: UserId,
    pub token_hash: String,
    pub expires_at: Timestamp,
    pub created_at: Timestamp,
}
