use std::sync::Arc;

use domain::{
    Conversation, ConversationId, DomainError, Message, MessageContent, MessageId,
    NewConversation, NewMessage, UserId,
};
use tracing::debug;

use crate::{
    clock::Clock,
    error::ApplicationError,
    repository::{ConversationRepository, MessageRepository},
};

/// 单页消息条数上限
pub const MAX_PAGE_SIZE: u32 = 100;
/// `limit` 不合法时使用的默认条数
pub const DEFAULT_PAGE_SIZE: u32 = 30;

pub struct ChatServiceDependencies {
    pub conversation_repository: Arc<dyn ConversationRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub clock: Arc<dyn Clock>,
}

/// 会话与消息服务，所有读写都先经过成员资格校验
pub struct ChatService {
    deps: ChatServiceDependencies,
}

impl ChatService {
    pub fn new(deps: ChatServiceDependencies) -> Self {
        Self { deps }
    }

    /// 幂等地创建两人私聊
    pub async fn create_direct_conversation(
        &self,
        user_a: UserId,
        user_b: UserId,
    ) -> Result<Conversation, ApplicationError> {
        if user_a == user_b {
            return Err(DomainError::invalid_argument(
                "userId",
                "cannot start a conversation with yourself",
            )
            .into());
        }

        if let Some(existing) = self
            .deps
            .conversation_repository
            .find_direct_between(user_a, user_b)
            .await?
        {
            return Ok(existing);
        }

        let now = self.deps.clock.now();
        let conversation = self
            .deps
            .conversation_repository
            .create_with_members(NewConversation::direct(now), &[user_a, user_b])
            .await?;
        debug!(conversation_id = %conversation.id, "创建私聊会话");
        Ok(conversation)
    }

    pub async fn list_conversations(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Conversation>, ApplicationError> {
        Ok(self
            .deps
            .conversation_repository
            .list_for_user(user_id)
            .await?)
    }

    pub async fn send_message(
        &self,
        user_id: UserId,
        conversation_id: ConversationId,
        content: &str,
    ) -> Result<Message, ApplicationError> {
        self.ensure_member(user_id, conversation_id).await?;

        let content = MessageContent::new(content)?;
        let message = self
            .deps
            .message_repository
            .create(NewMessage {
                conversation_id,
                sender_id: user_id,
                content,
                sent_at: self.deps.clock.now(),
            })
            .await?;
        Ok(message)
    }

    /// 按 ID 倒序分页；`before_id` 为正数时只返回更早的消息
    pub async fn get_messages(
        &self,
        user_id: UserId,
        conversation_id: ConversationId,
        limit: i64,
        before_id: Option<i64>,
    ) -> Result<Vec<Message>, ApplicationError> {
        self.ensure_member(user_id, conversation_id).await?;

        let limit = clamp_limit(limit);
        let before = before_id.filter(|id| *id > 0).map(MessageId::new);
        Ok(self
            .deps
            .message_repository
            .list(conversation_id, limit, before)
            .await?)
    }

    async fn ensure_member(
        &self,
        user_id: UserId,
        conversation_id: ConversationId,
    ) -> Result<(), ApplicationError> {
        if self
            .deps
            .conversation_repository
            .is_member(conversation_id, user_id)
            .await?
        {
            Ok(())
        } else {
            Err(ApplicationError::Forbidden)
        }
    }
}

fn clamp_limit(limit: i64) -> u32 {
    if (1..=i64::from(MAX_PAGE_SIZE)).contains(&limit) {
        limit as u32
    } else {
        DEFAULT_PAGE_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_outside_bounds_falls_back_to_default() {
        assert_eq!(clamp_limit(0), DEFAULT_PAGE_SIZE);
        assert_eq!(clamp_limit(-5), DEFAULT_PAGE_SIZE);
        assert_eq!(clamp_limit(101), DEFAULT_PAGE_SIZE);
        assert_eq!(clamp_limit(1), 1);
        assert_eq!(clamp_limit(100), 100);
    }
}
