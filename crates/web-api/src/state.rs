use std::{net::IpAddr, sync::Arc};

use application::{
    AuditRepository, ChatService, ChatServiceDependencies, Clock, ConversationRepository,
    LoginRateLimiter, MemoryStore, MessageRepository, MessagingHub, PasswordHasher,
    RefreshTokenRepository, TokenCodec, TokenPolicy, TokenService, TokenServiceDependencies,
    UserRepository, UserService, UserServiceDependencies,
};
use config::{AppConfig, RealtimeConfig};
use infrastructure::PgStorage;

/// 服务所需的全部仓储端口
#[derive(Clone)]
pub struct Repositories {
    pub users: Arc<dyn UserRepository>,
    pub refresh_tokens: Arc<dyn RefreshTokenRepository>,
    pub audit: Arc<dyn AuditRepository>,
    pub conversations: Arc<dyn ConversationRepository>,
    pub messages: Arc<dyn MessageRepository>,
}

impl Repositories {
    /// 进程内存储，适用于开发和测试
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            users: store.clone(),
            refresh_tokens: store.clone(),
            audit: store.clone(),
            conversations: store.clone(),
            messages: store,
        }
    }

    pub fn postgres(storage: &PgStorage) -> Self {
        Self {
            users: storage.user_repository.clone(),
            refresh_tokens: storage.refresh_token_repository.clone(),
            audit: storage.audit_repository.clone(),
            conversations: storage.conversation_repository.clone(),
            messages: storage.message_repository.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub token_service: Arc<TokenService>,
    pub user_service: Arc<UserService>,
    pub chat_service: Arc<ChatService>,
    pub hub: MessagingHub,
    pub login_limiter: Arc<LoginRateLimiter>,
    pub realtime: Arc<RealtimeConfig>,
    /// 允许携带代理头的对端地址
    pub trusted_proxies: Arc<[IpAddr]>,
}

impl AppState {
    /// 按配置装配用例服务
    pub fn build(
        config: &AppConfig,
        repositories: Repositories,
        password_hasher: Arc<dyn PasswordHasher>,
        clock: Arc<dyn Clock>,
        hub: MessagingHub,
    ) -> Self {
        let codec = TokenCodec::new(
            config.auth.jwt_secret.as_bytes(),
            config.auth.issuer.clone(),
            config.auth.access_ttl(),
        );

        let token_service = TokenService::new(TokenServiceDependencies {
            user_repository: repositories.users.clone(),
            refresh_token_repository: repositories.refresh_tokens,
            audit_repository: repositories.audit,
            password_hasher: password_hasher.clone(),
            codec,
            clock: clock.clone(),
            policy: TokenPolicy::from_config(&config.auth),
        });

        let user_service = UserService::new(UserServiceDependencies {
            user_repository: repositories.users,
            password_hasher,
            clock: clock.clone(),
        });

        let chat_service = ChatService::new(ChatServiceDependencies {
            conversation_repository: repositories.conversations,
            message_repository: repositories.messages,
            clock,
        });

        let login_limiter = LoginRateLimiter::new(
            config.rate_limit.login_burst,
            std::time::Duration::from_secs(config.rate_limit.login_refill_seconds),
        );

        Self {
            token_service: Arc::new(token_service),
            user_service: Arc::new(user_service),
            chat_service: Arc::new(chat_service),
            hub,
            login_limiter: Arc::new(login_limiter),
            realtime: Arc::new(config.realtime.clone()),
            trusted_proxies: config.server.trusted_proxies.clone().into(),
        }
    }
}
