use async_trait::async_trait;
use domain::{
    AuditEvent, Conversation, ConversationId, Message, MessageId, NewConversation, NewMessage,
    NewRefreshToken, RefreshToken, RefreshTokenId, RepositoryError, Timestamp, User, UserEmail,
    UserId,
};

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// 邮箱重复时返回 `RepositoryError::Conflict`
    async fn create(&self, user: User) -> Result<User, RepositoryError>;
    /// 整行覆盖写（后写者胜）
    async fn update(&self, user: User) -> Result<User, RepositoryError>;
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError>;
    async fn find_by_email(&self, email: &UserEmail) -> Result<Option<User>, RepositoryError>;
}

#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    async fn create(&self, token: NewRefreshToken) -> Result<RefreshToken, RepositoryError>;

    /// 只返回未撤销且未过期的记录
    async fn find_live_by_hash(
        &self,
        token_hash: &str,
        now: Timestamp,
    ) -> Result<Option<RefreshToken>, RepositoryError>;

    /// 条件撤销：仅当记录尚未撤销时写入撤销时间。返回本次调用是否真正完成了撤销。
    async fn revoke(&self, id: RefreshTokenId, at: Timestamp) -> Result<bool, RepositoryError>;

    /// 记录轮换链：旧令牌被哪一条新令牌替换
    async fn link_replacement(
        &self,
        id: RefreshTokenId,
        replaced_by: RefreshTokenId,
    ) -> Result<(), RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn append(&self, event: AuditEvent) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn is_member(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<bool, RepositoryError>;

    /// 查找恰好包含这两个成员的非群组会话
    async fn find_direct_between(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<Conversation>, RepositoryError>;

    /// 会话与全部成员在同一个原子单元内写入
    async fn create_with_members(
        &self,
        conversation: NewConversation,
        members: &[UserId],
    ) -> Result<Conversation, RepositoryError>;

    /// 按最近更新时间倒序
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Conversation>, RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn create(&self, message: NewMessage) -> Result<Message, RepositoryError>;

    /// 按 ID 倒序返回最多 `limit` 条；`before` 存在时只返回 ID 严格小于它的消息
    async fn list(
        &self,
        conversation_id: ConversationId,
        limit: u32,
        before: Option<MessageId>,
    ) -> Result<Vec<Message>, RepositoryError>;
}
