//! 应用层实现。
//!
//! 这里提供围绕领域模型的用例服务（令牌生命周期、注册、会话消息），
//! 进程内的实时消息中枢，以及对外部适配器（仓储、密码哈希、时钟）的抽象。

pub mod clock;
pub mod error;
pub mod hub;
pub mod memory;
pub mod password;
pub mod rate_limiter;
pub mod repository;
pub mod services;
pub mod token;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::ApplicationError;
pub use hub::{HubError, MessagingHub, SessionHandle, SessionId};
pub use memory::MemoryStore;
pub use password::{PasswordHasher, PasswordHasherError};
pub use rate_limiter::{LoginRateLimiter, RateLimitError};
pub use repository::{
    AuditRepository, ConversationRepository, MessageRepository, RefreshTokenRepository,
    UserRepository,
};
pub use services::{
    ChatService, ChatServiceDependencies, ClientMeta, RegisterUserRequest, TokenPair, TokenPolicy,
    TokenService, TokenServiceDependencies, UserService, UserServiceDependencies,
};
pub use token::{hash_refresh_token, AccessClaims, RefreshTokenGenerator, TokenCodec, TokenError};
