use serde::{Deserialize, Serialize};

use crate::value_objects::{ConversationId, MessageContent, MessageId, Timestamp, UserId};

/// 已持久化的消息。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: MessageContent,
    #[serde(with = "time::serde::rfc3339")]
    pub sent_at: Timestamp,
}

/// 待写入的消息，`sent_at` 由服务端时钟决定。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: MessageContent,
    pub sent_at: Timestamp,
}
