use serde::{Deserialize, Serialize};

use crate::value_objects::{ConversationId, Timestamp, UserId};

/// 会话。实时层把每个会话当作一个房间。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub is_group: bool,
    pub title: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: Timestamp,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: Timestamp,
}

/// 尚未分配 ID 的会话，由存储层在插入时补全。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConversation {
    pub is_group: bool,
    pub title: Option<String>,
    pub created_at: Timestamp,
}

impl NewConversation {
    pub fn direct(now: Timestamp) -> Self {
        Self {
            is_group: false,
            title: None,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMember {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub role: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: Timestamp,
}

impl ConversationMember {
    pub const DEFAULT_ROLE: &'static str = "member";

    pub fn member(conversation_id: ConversationId, user_id: UserId, now: Timestamp) -> Self {
        Self {
            conversation_id,
            user_id,
            role: Self::DEFAULT_ROLE.to_owned(),
            created_at: now,
        }
    }
}
