//! 聊天后端核心领域模型
//!
//! 包含用户、会话、消息、刷新令牌与审计事件等实体，以及相关的值对象和错误类型。

pub mod audit;
pub mod conversation;
pub mod errors;
pub mod message;
pub mod refresh_token;
pub mod user;
pub mod value_objects;

// 重新导出常用类型
pub use audit::{AuditEvent, AuditEventKind};
pub use conversation::{Conversation, ConversationMember, NewConversation};
pub use errors::{DomainError, RepositoryError};
pub use message::{Message, NewMessage};
pub use refresh_token::{NewRefreshToken, RefreshToken};
pub use user::{LoginFailure, User};
pub use value_objects::{
    ConversationId, MessageContent, MessageId, PasswordHash, RefreshTokenId, Timestamp, UserEmail,
    UserId, Username,
};
