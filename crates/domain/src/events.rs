//! 通知事件载荷定义
//!
//! 每种通知类型都有显式的、带版本号的载荷结构（而非临时拼装的匿名负载），
//! 统一包裹在 `EventEnvelope` 中投递。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::conversation::{Conversation, LastMessage};
use crate::entities::message::Message;
use crate::entities::presence::PresenceStatus;
use crate::ids::{ConversationId, MessageId, UserId};

/// 当前事件载荷模式版本
pub const EVENT_SCHEMA_VERSION: u16 = 1;

/// 删除通知的作用范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteScope {
    /// 仅请求者本地隐藏
    Me,
    /// 面向所有人的墓碑化
    Everyone,
}

/// 会话在通知中的快照载荷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub id: ConversationId,
    pub name: String,
    pub is_group: bool,
    pub participant_ids: Vec<UserId>,
    pub creator_id: UserId,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
    pub invite_token: Option<String>,
    pub last_message: Option<LastMessage>,
}

impl From<&Conversation> for ConversationSnapshot {
    fn from(conversation: &Conversation) -> Self {
        Self {
            id: conversation.id,
            name: conversation.name.clone(),
            is_group: conversation.is_group,
            participant_ids: conversation.participant_ids.clone(),
            creator_id: conversation.creator_id,
            description: conversation.description.clone(),
            avatar_url: conversation.avatar_url.clone(),
            invite_token: conversation.invite_token.clone(),
            last_message: conversation.last_message.clone(),
        }
    }
}

/// 通知事件
///
/// 每个变体只携带该通知类型需要的数据。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChatEvent {
    /// 会话创建
    #[serde(rename = "conversation.created")]
    ConversationCreated { conversation: ConversationSnapshot },

    /// 会话信息或参与者变更
    #[serde(rename = "conversation.updated")]
    ConversationUpdated { conversation: ConversationSnapshot },

    /// 会话解散（含级联消息删除）
    #[serde(rename = "conversation.disbanded")]
    ConversationDisbanded {
        conversation_id: ConversationId,
        disbanded_by: UserId,
    },

    /// 新消息
    #[serde(rename = "message.created")]
    MessageCreated { message: Message },

    /// 消息删除（按作用范围区分）
    #[serde(rename = "message.deleted")]
    MessageDeleted {
        conversation_id: ConversationId,
        message_id: MessageId,
        scope: DeleteScope,
        deleted_by: UserId,
    },

    /// 表情回应变更
    #[serde(rename = "message.reacted")]
    MessageReacted {
        conversation_id: ConversationId,
        message_id: MessageId,
        user_id: UserId,
        kind: String,
        reacted_at: DateTime<Utc>,
    },

    /// 在线状态变更
    #[serde(rename = "presence.changed")]
    PresenceChanged {
        user_id: UserId,
        status: PresenceStatus,
        last_seen: Option<DateTime<Utc>>,
    },
}

impl ChatEvent {
    /// 获取事件类型名称
    pub fn event_type(&self) -> &'static str {
        match self {
            ChatEvent::ConversationCreated { .. } => "conversation.created",
            ChatEvent::ConversationUpdated { .. } => "conversation.updated",
            ChatEvent::ConversationDisbanded { .. } => "conversation.disbanded",
            ChatEvent::MessageCreated { .. } => "message.created",
            ChatEvent::MessageDeleted { .. } => "message.deleted",
            ChatEvent::MessageReacted { .. } => "message.reacted",
            ChatEvent::PresenceChanged { .. } => "presence.changed",
        }
    }

    /// 获取事件关联的会话ID（如有）
    pub fn conversation_id(&self) -> Option<ConversationId> {
        match self {
            ChatEvent::ConversationCreated { conversation }
            | ChatEvent::ConversationUpdated { conversation } => Some(conversation.id),
            ChatEvent::ConversationDisbanded {
                conversation_id, ..
            }
            | ChatEvent::MessageDeleted {
                conversation_id, ..
            }
            | ChatEvent::MessageReacted {
                conversation_id, ..
            } => Some(*conversation_id),
            ChatEvent::MessageCreated { message } => Some(message.conversation_id),
            ChatEvent::PresenceChanged { .. } => None,
        }
    }
}

/// 带版本号的事件信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// 载荷模式版本
    pub version: u16,
    /// 发出时间
    pub emitted_at: DateTime<Utc>,
    /// 事件载荷
    #[serde(flatten)]
    pub event: ChatEvent,
}

impl EventEnvelope {
    pub fn new(event: ChatEvent) -> Self {
        Self {
            version: EVENT_SCHEMA_VERSION,
            emitted_at: Utc::now(),
            event,
        }
    }
}
