//! 实时连接上的 JSON 帧

use domain::{ConversationId, Message, UserId};
use serde::{Deserialize, Serialize};

/// 客户端发来的帧；不认识或缺字段的帧在解析阶段就被丢弃
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundFrame {
    #[serde(rename_all = "camelCase")]
    Message {
        conversation_id: ConversationId,
        content: String,
    },
    #[serde(rename_all = "camelCase")]
    Typing {
        conversation_id: ConversationId,
        is_typing: bool,
    },
}

impl InboundFrame {
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    pub fn conversation_id(&self) -> ConversationId {
        match self {
            InboundFrame::Message {
                conversation_id, ..
            }
            | InboundFrame::Typing {
                conversation_id, ..
            } => *conversation_id,
        }
    }
}

/// 通过中枢广播给房间的帧
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundFrame<'a> {
    Message {
        message: &'a Message,
    },
    #[serde(rename_all = "camelCase")]
    Typing {
        conversation_id: ConversationId,
        user_id: UserId,
        is_typing: bool,
    },
}

impl OutboundFrame<'_> {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
