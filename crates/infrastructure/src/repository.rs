use std::sync::Arc;

use application::repository::{
    AuditRepository, ConversationRepository, MessageRepository, RefreshTokenRepository,
    UserRepository,
};
use async_trait::async_trait;
use domain::{
    AuditEvent, Conversation, ConversationId, Message, MessageContent, MessageId,
    NewConversation, NewMessage, NewRefreshToken, RefreshToken, RefreshTokenId, RepositoryError,
    Timestamp, User, UserEmail, UserId,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict,
        _ => RepositoryError::storage(err.to_string()),
    }
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

const USER_COLUMNS: &str = "id, username, email, password_hash, failed_login_attempts, \
                            locked_until, last_login_at, created_at, updated_at";
const REFRESH_TOKEN_COLUMNS: &str =
    "id, user_id, token_hash, expires_at, revoked_at, replaced_by, created_at";
const CONVERSATION_COLUMNS: &str = "id, is_group, title, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, content, sent_at";

#[derive(Debug, FromRow)]
struct UserRecord {
    id: Uuid,
    username: String,
    email: String,
    password_hash: String,
    failed_login_attempts: i32,
    locked_until: Option<OffsetDateTime>,
    last_login_at: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<UserRecord> for User {
    type Error = RepositoryError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        let username =
            domain::Username::parse(value.username).map_err(|err| invalid_data(err.to_string()))?;
        let email =
            domain::UserEmail::parse(value.email).map_err(|err| invalid_data(err.to_string()))?;
        let password = domain::PasswordHash::new(value.password_hash)
            .map_err(|err| invalid_data(err.to_string()))?;

        Ok(User {
            id: UserId::from(value.id),
            username,
            email,
            password,
            failed_login_attempts: u32::try_from(value.failed_login_attempts).unwrap_or(0),
            locked_until: value.locked_until,
            last_login_at: value.last_login_at,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct RefreshTokenRecord {
    id: i64,
    user_id: Uuid,
    token_hash: String,
    expires_at: OffsetDateTime,
    revoked_at: Option<OffsetDateTime>,
    replaced_by: Option<i64>,
    created_at: OffsetDateTime,
}

impl From<RefreshTokenRecord> for RefreshToken {
    fn from(value: RefreshTokenRecord) -> Self {
        RefreshToken {
            id: RefreshTokenId::from(value.id),
            user_id: UserId::from(value.user_id),
            token_hash: value.token_hash,
            expires_at: value.expires_at,
            revoked_at: value.revoked_at,
            replaced_by: value.replaced_by.map(RefreshTokenId::from),
            created_at: value.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct ConversationRecord {
    id: i64,
    is_group: bool,
    title: Option<String>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<ConversationRecord> for Conversation {
    fn from(value: ConversationRecord) -> Self {
        Conversation {
            id: ConversationId::from(value.id),
            is_group: value.is_group,
            title: value.title,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: i64,
    conversation_id: i64,
    sender_id: Uuid,
    content: String,
    sent_at: OffsetDateTime,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let content =
            MessageContent::new(value.content).map_err(|err| invalid_data(err.to_string()))?;
        Ok(Message {
            id: MessageId::from(value.id),
            conversation_id: ConversationId::from(value.conversation_id),
            sender_id: UserId::from(value.sender_id),
            content,
            sent_at: value.sent_at,
        })
    }
}

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, user: User) -> Result<User, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            r#"
            INSERT INTO users (id, username, email, password_hash, failed_login_attempts,
                               locked_until, last_login_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::from(user.id))
        .bind(user.username.as_str())
        .bind(user.email.as_str())
        .bind(user.password.as_str())
        .bind(i32::try_from(user.failed_login_attempts).unwrap_or(i32::MAX))
        .bind(user.locked_until)
        .bind(user.last_login_at)
        .bind(user.created_at)
        .bind(user.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        User::try_from(record)
    }

    async fn update(&self, user: User) -> Result<User, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            r#"
            UPDATE users
            SET username = $2, email = $3, password_hash = $4, failed_login_attempts = $5,
                locked_until = $6, last_login_at = $7, updated_at = $8
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::from(user.id))
        .bind(user.username.as_str())
        .bind(user.email.as_str())
        .bind(user.password.as_str())
        .bind(i32::try_from(user.failed_login_attempts).unwrap_or(i32::MAX))
        .bind(user.locked_until)
        .bind(user.last_login_at)
        .bind(user.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        User::try_from(record)
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(User::try_from).transpose()
    }

    async fn find_by_email(&self, email: &UserEmail) -> Result<Option<User>, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(User::try_from).transpose()
    }
}

#[derive(Clone)]
pub struct PgRefreshTokenRepository {
    pool: PgPool,
}

impl PgRefreshTokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshTokenRepository for PgRefreshTokenRepository {
    async fn create(&self, token: NewRefreshToken) -> Result<RefreshToken, RepositoryError> {
        let record = sqlx::query_as::<_, RefreshTokenRecord>(&format!(
            r#"
            INSERT INTO refresh_tokens (user_id, token_hash, expires_at, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING {REFRESH_TOKEN_COLUMNS}
            "#
        ))
        .bind(Uuid::from(token.user_id))
        .bind(&token.token_hash)
        .bind(token.expires_at)
        .bind(token.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.into())
    }

    async fn find_live_by_hash(
        &self,
        token_hash: &str,
        now: Timestamp,
    ) -> Result<Option<RefreshToken>, RepositoryError> {
        let record = sqlx::query_as::<_, RefreshTokenRecord>(&format!(
            r#"
            SELECT {REFRESH_TOKEN_COLUMNS}
            FROM refresh_tokens
            WHERE token_hash = $1 AND revoked_at IS NULL AND expires_at > $2
            "#
        ))
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(RefreshToken::from))
    }

    async fn revoke(&self, id: RefreshTokenId, at: Timestamp) -> Result<bool, RepositoryError> {
        // 条件更新保证并发轮换时只有一个请求能撤销成功
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = $2 WHERE id = $1 AND revoked_at IS NULL",
        )
        .bind(i64::from(id))
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn link_replacement(
        &self,
        id: RefreshTokenId,
        replaced_by: RefreshTokenId,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE refresh_tokens SET replaced_by = $2 WHERE id = $1")
            .bind(i64::from(id))
            .bind(i64::from(replaced_by))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgAuditRepository {
    pool: PgPool,
}

impl PgAuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditRepository for PgAuditRepository {
    async fn append(&self, event: AuditEvent) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (user_id, event, email, ip, user_agent, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.user_id.map(Uuid::from))
        .bind(event.kind.as_str())
        .bind(&event.email)
        .bind(&event.ip)
        .bind(&event.user_agent)
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(())
    }
}

#[derive(Clone)]
pub struct PgConversationRepository {
    pool: PgPool,
}

impl PgConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationRepository for PgConversationRepository {
    async fn is_member(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<bool, RepositoryError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM conversation_members
                WHERE conversation_id = $1 AND user_id = $2
            )
            "#,
        )
        .bind(i64::from(conversation_id))
        .bind(Uuid::from(user_id))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(exists)
    }

    async fn find_direct_between(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let record = sqlx::query_as::<_, ConversationRecord>(
            r#"
            SELECT c.id, c.is_group, c.title, c.created_at, c.updated_at
            FROM conversations c
            JOIN conversation_members m1 ON m1.conversation_id = c.id AND m1.user_id = $1
            JOIN conversation_members m2 ON m2.conversation_id = c.id AND m2.user_id = $2
            WHERE c.is_group = FALSE
              AND (SELECT COUNT(*) FROM conversation_members m WHERE m.conversation_id = c.id) = 2
            ORDER BY c.id
            LIMIT 1
            "#,
        )
        .bind(Uuid::from(a))
        .bind(Uuid::from(b))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(Conversation::from))
    }

    async fn create_with_members(
        &self,
        conversation: NewConversation,
        members: &[UserId],
    ) -> Result<Conversation, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let record = sqlx::query_as::<_, ConversationRecord>(&format!(
            r#"
            INSERT INTO conversations (is_group, title, created_at, updated_at)
            VALUES ($1, $2, $3, $3)
            RETURNING {CONVERSATION_COLUMNS}
            "#
        ))
        .bind(conversation.is_group)
        .bind(conversation.title.as_deref())
        .bind(conversation.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        for user_id in members {
            sqlx::query(
                r#"
                INSERT INTO conversation_members (conversation_id, user_id, role, created_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (conversation_id, user_id) DO NOTHING
                "#,
            )
            .bind(record.id)
            .bind(Uuid::from(*user_id))
            .bind(domain::ConversationMember::DEFAULT_ROLE)
            .bind(conversation.created_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        }

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(record.into())
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Conversation>, RepositoryError> {
        let records = sqlx::query_as::<_, ConversationRecord>(
            r#"
            SELECT c.id, c.is_group, c.title, c.created_at, c.updated_at
            FROM conversations c
            JOIN conversation_members m ON m.conversation_id = c.id
            WHERE m.user_id = $1
            ORDER BY c.updated_at DESC, c.id DESC
            "#,
        )
        .bind(Uuid::from(user_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(Conversation::from).collect())
    }
}

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn create(&self, message: NewMessage) -> Result<Message, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            INSERT INTO messages (conversation_id, sender_id, content, sent_at)
            VALUES ($1, $2, $3, $4)
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(i64::from(message.conversation_id))
        .bind(Uuid::from(message.sender_id))
        .bind(message.content.as_str())
        .bind(message.sent_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        sqlx::query("UPDATE conversations SET updated_at = $2 WHERE id = $1")
            .bind(i64::from(message.conversation_id))
            .bind(message.sent_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Message::try_from(record)
    }

    async fn list(
        &self,
        conversation_id: ConversationId,
        limit: u32,
        before: Option<MessageId>,
    ) -> Result<Vec<Message>, RepositoryError> {
        let records = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM messages
            WHERE conversation_id = $1 AND ($2::BIGINT IS NULL OR id < $2)
            ORDER BY id DESC
            LIMIT $3
            "#
        ))
        .bind(i64::from(conversation_id))
        .bind(before.map(i64::from))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(Message::try_from).collect()
    }
}

/// Postgres 仓储集合
#[derive(Clone)]
pub struct PgStorage {
    pub pool: PgPool,
    pub user_repository: Arc<PgUserRepository>,
    pub refresh_token_repository: Arc<PgRefreshTokenRepository>,
    pub audit_repository: Arc<PgAuditRepository>,
    pub conversation_repository: Arc<PgConversationRepository>,
    pub message_repository: Arc<PgMessageRepository>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            user_repository: Arc::new(PgUserRepository::new(pool.clone())),
            refresh_token_repository: Arc::new(PgRefreshTokenRepository::new(pool.clone())),
            audit_repository: Arc::new(PgAuditRepository::new(pool.clone())),
            conversation_repository: Arc::new(PgConversationRepository::new(pool.clone())),
            message_repository: Arc::new(PgMessageRepository::new(pool.clone())),
            pool,
        }
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
