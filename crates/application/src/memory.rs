//! 内存存储实现
//!
//! 实现全部仓储端口，供测试以及 `database.backend = "memory"` 的单机运行使用。
//! 所有表放在同一把读写锁后面，使会话与成员的创建天然是原子的。

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use domain::{
    AuditEvent, Conversation, ConversationId, ConversationMember, Message, MessageId,
    NewConversation, NewMessage, NewRefreshToken, RefreshToken, RefreshTokenId, RepositoryError,
    Timestamp, User, UserEmail, UserId,
};
use tokio::sync::RwLock;

use crate::repository::{
    AuditRepository, ConversationRepository, MessageRepository, RefreshTokenRepository,
    UserRepository,
};

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, User>,
    refresh_tokens: BTreeMap<RefreshTokenId, RefreshToken>,
    audit_events: Vec<AuditEvent>,
    conversations: BTreeMap<ConversationId, Conversation>,
    members: Vec<ConversationMember>,
    messages: BTreeMap<MessageId, Message>,
    next_refresh_token_id: i64,
    next_conversation_id: i64,
    next_message_id: i64,
}

impl Tables {
    fn next_id(counter: &mut i64) -> i64 {
        *counter += 1;
        *counter
    }

    fn members_of(&self, conversation_id: ConversationId) -> impl Iterator<Item = UserId> + '_ {
        self.members
            .iter()
            .filter(move |m| m.conversation_id == conversation_id)
            .map(|m| m.user_id)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已写入的审计事件快照
    pub async fn audit_events(&self) -> Vec<AuditEvent> {
        self.tables.read().await.audit_events.clone()
    }

    pub async fn refresh_tokens(&self) -> Vec<RefreshToken> {
        self.tables
            .read()
            .await
            .refresh_tokens
            .values()
            .cloned()
            .collect()
    }

    pub async fn members(&self, conversation_id: ConversationId) -> Vec<UserId> {
        self.tables
            .read()
            .await
            .members_of(conversation_id)
            .collect()
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create(&self, user: User) -> Result<User, RepositoryError> {
        let mut tables = self.tables.write().await;
        if tables.users.values().any(|u| u.email == user.email) {
            return Err(RepositoryError::Conflict);
        }
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update(&self, user: User) -> Result<User, RepositoryError> {
        let mut tables = self.tables.write().await;
        match tables.users.get_mut(&user.id) {
            Some(stored) => {
                *stored = user.clone();
                Ok(user)
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &UserEmail) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .tables
            .read()
            .await
            .users
            .values()
            .find(|u| &u.email == email)
            .cloned())
    }
}

#[async_trait]
impl RefreshTokenRepository for MemoryStore {
    async fn create(&self, token: NewRefreshToken) -> Result<RefreshToken, RepositoryError> {
        let mut tables = self.tables.write().await;
        let id = RefreshTokenId::new(Tables::next_id(&mut tables.next_refresh_token_id));
        let record = RefreshToken {
            id,
            user_id: token.user_id,
            token_hash: token.token_hash,
            expires_at: token.expires_at,
            revoked_at: None,
            replaced_by: None,
            created_at: token.created_at,
        };
        tables.refresh_tokens.insert(id, record.clone());
        Ok(record)
    }

    async fn find_live_by_hash(
        &self,
        token_hash: &str,
        now: Timestamp,
    ) -> Result<Option<RefreshToken>, RepositoryError> {
        Ok(self
            .tables
            .read()
            .await
            .refresh_tokens
            .values()
            .find(|t| t.token_hash == token_hash && t.is_live(now))
            .cloned())
    }

    async fn revoke(&self, id: RefreshTokenId, at: Timestamp) -> Result<bool, RepositoryError> {
        let mut tables = self.tables.write().await;
        match tables.refresh_tokens.get_mut(&id) {
            Some(token) if token.revoked_at.is_none() => {
                token.revoked_at = Some(at);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn link_replacement(
        &self,
        id: RefreshTokenId,
        replaced_by: RefreshTokenId,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        let token = tables
            .refresh_tokens
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound)?;
        token.replaced_by = Some(replaced_by);
        Ok(())
    }
}

#[async_trait]
impl AuditRepository for MemoryStore {
    async fn append(&self, event: AuditEvent) -> Result<(), RepositoryError> {
        self.tables.write().await.audit_events.push(event);
        Ok(())
    }
}

#[async_trait]
impl ConversationRepository for MemoryStore {
    async fn is_member(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<bool, RepositoryError> {
        Ok(self
            .tables
            .read()
            .await
            .members_of(conversation_id)
            .any(|id| id == user_id))
    }

    async fn find_direct_between(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let tables = self.tables.read().await;
        let found = tables.conversations.values().find(|c| {
            if c.is_group {
                return false;
            }
            let mut members: Vec<UserId> = tables.members_of(c.id).collect();
            members.sort_by_key(|id| id.0);
            members.dedup();
            let mut wanted = vec![a, b];
            wanted.sort_by_key(|id| id.0);
            wanted.dedup();
            members == wanted
        });
        Ok(found.cloned())
    }

    async fn create_with_members(
        &self,
        conversation: NewConversation,
        members: &[UserId],
    ) -> Result<Conversation, RepositoryError> {
        let mut tables = self.tables.write().await;
        let id = ConversationId::new(Tables::next_id(&mut tables.next_conversation_id));
        let created = Conversation {
            id,
            is_group: conversation.is_group,
            title: conversation.title,
            created_at: conversation.created_at,
            updated_at: conversation.created_at,
        };
        tables.conversations.insert(id, created.clone());

        let mut seen = Vec::with_capacity(members.len());
        for user_id in members {
            if seen.contains(user_id) {
                continue;
            }
            seen.push(*user_id);
            tables.members.push(ConversationMember::member(
                id,
                *user_id,
                conversation.created_at,
            ));
        }
        Ok(created)
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Conversation>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut conversations: Vec<Conversation> = tables
            .members
            .iter()
            .filter(|m| m.user_id == user_id)
            .filter_map(|m| tables.conversations.get(&m.conversation_id).cloned())
            .collect();
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        Ok(conversations)
    }
}

#[async_trait]
impl MessageRepository for MemoryStore {
    async fn create(&self, message: NewMessage) -> Result<Message, RepositoryError> {
        let mut tables = self.tables.write().await;
        let conversation = tables
            .conversations
            .get_mut(&message.conversation_id)
            .ok_or(RepositoryError::NotFound)?;
        conversation.updated_at = message.sent_at;

        let id = MessageId::new(Tables::next_id(&mut tables.next_message_id));
        let stored = Message {
            id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content: message.content,
            sent_at: message.sent_at,
        };
        tables.messages.insert(id, stored.clone());
        Ok(stored)
    }

    async fn list(
        &self,
        conversation_id: ConversationId,
        limit: u32,
        before: Option<MessageId>,
    ) -> Result<Vec<Message>, RepositoryError> {
        let tables = self.tables.read().await;
        let upper = before.unwrap_or(MessageId::new(i64::MAX));
        Ok(tables
            .messages
            .range(..upper)
            .rev()
            .map(|(_, m)| m)
            .filter(|m| m.conversation_id == conversation_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}
