//! 消息实体定义
//!
//! 包含消息的核心信息、已读跟踪、表情回应和两条独立的软删除轴
//! （按用户隐藏 / 面向所有人的墓碑）。
//!
//! 不变量：
//! - `read_by` 在创建时预置发送者；
//! - 每个用户在任意时刻最多持有一个表情回应，重复同类回应为撤销，
//!   不同类回应为替换；
//! - 一旦 `is_deleted_for_everyone` 置位，`content`、`reactions` 与回复快照
//!   被清空且不再被重新填充；消息ID与外壳元数据保留以维持时间线连续性。

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{DomainError, DomainResult};
use crate::ids::{ConversationId, MessageId, UserId};

/// 消息类型枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// 文本消息
    Text,
    /// 图片消息
    Image,
    /// 文件消息
    File,
    /// 系统消息（结构性变更合成）
    System,
    /// 语音消息
    Voice,
}

impl Default for MessageType {
    fn default() -> Self {
        Self::Text
    }
}

/// 单个用户的表情回应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    /// 回应类型（客户端定义的不透明标识，如表情名）
    pub kind: String,
    /// 回应时间
    pub reacted_at: DateTime<Utc>,
}

/// 表情回应变更结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionChange {
    /// 新增回应
    Added,
    /// 替换为不同类型
    Replaced,
    /// 同类回应被撤销
    Removed,
}

/// 回复消息的冻结快照
///
/// 在回复发生时固化，不随被回复消息的后续变更而更新。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplySnapshot {
    /// 被回复的消息ID
    pub message_id: MessageId,
    /// 回复时刻的消息内容
    pub content: Option<String>,
    /// 回复时刻的发送者显示名
    pub sender_name: String,
}

/// 墓碑消息的预览占位文案
pub const REMOVED_MESSAGE_PREVIEW: &str = "Message removed";

/// 消息实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// 消息唯一ID
    pub id: MessageId,
    /// 所属会话ID
    pub conversation_id: ConversationId,
    /// 发送者ID（系统消息为 nil UUID）
    pub sender_id: UserId,
    /// 消息内容（墓碑化后为 None）
    pub content: Option<String>,
    /// 消息类型
    pub message_type: MessageType,
    /// 发送时间
    pub created_at: DateTime<Utc>,
    /// 已读用户集合（发送者预置）
    pub read_by: HashSet<UserId>,
    /// 表情回应：用户ID -> 回应（每用户至多一个）
    pub reactions: HashMap<UserId, Reaction>,
    /// 已在本地隐藏该消息的用户集合
    pub deleted_for_user_ids: HashSet<UserId>,
    /// 面向所有人的墓碑标志（单向，不可逆）
    pub is_deleted_for_everyone: bool,
    /// 执行墓碑化的用户
    pub deleted_for_everyone_by: Option<UserId>,
    /// 墓碑化时间
    pub deleted_for_everyone_at: Option<DateTime<Utc>>,
    /// 回复快照（可选）
    pub reply_to: Option<ReplySnapshot>,
}

impl Message {
    /// 创建新消息
    pub fn new(
        conversation_id: ConversationId,
        sender_id: UserId,
        content: impl Into<String>,
        message_type: MessageType,
        reply_to: Option<ReplySnapshot>,
    ) -> DomainResult<Self> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(DomainError::validation("content", "cannot be empty"));
        }

        let mut read_by = HashSet::new();
        read_by.insert(sender_id);

        Ok(Self {
            id: MessageId::new(Uuid::new_v4()),
            conversation_id,
            sender_id,
            content: Some(content),
            message_type,
            created_at: Utc::now(),
            read_by,
            reactions: HashMap::new(),
            deleted_for_user_ids: HashSet::new(),
            is_deleted_for_everyone: false,
            deleted_for_everyone_by: None,
            deleted_for_everyone_at: None,
            reply_to,
        })
    }

    /// 创建系统消息（记录结构性变更，发送者为保留的系统标识）
    pub fn new_system(
        conversation_id: ConversationId,
        content: impl Into<String>,
    ) -> DomainResult<Self> {
        Self::new(
            conversation_id,
            UserId::system(),
            content,
            MessageType::System,
            None,
        )
    }

    /// 标记用户已读，返回是否实际发生了变更
    pub fn mark_read(&mut self, user_id: UserId) -> bool {
        self.read_by.insert(user_id)
    }

    /// 用户是否未读（发送者视为已读）
    pub fn is_unread_by(&self, user_id: UserId) -> bool {
        self.sender_id != user_id && !self.read_by.contains(&user_id)
    }

    /// 表情回应的幂等切换
    ///
    /// 同类回应撤销，不同类回应替换，每用户至多一个。
    /// 墓碑化的消息不再接受回应（返回 None）。
    pub fn react(&mut self, user_id: UserId, kind: &str) -> DomainResult<Option<ReactionChange>> {
        if kind.trim().is_empty() {
            return Err(DomainError::validation("reaction", "cannot be empty"));
        }
        if self.is_deleted_for_everyone {
            return Ok(None);
        }

        let change = match self.reactions.get(&user_id) {
            Some(existing) if existing.kind == kind => {
                self.reactions.remove(&user_id);
                ReactionChange::Removed
            }
            Some(_) => {
                self.reactions.insert(
                    user_id,
                    Reaction {
                        kind: kind.to_string(),
                        reacted_at: Utc::now(),
                    },
                );
                ReactionChange::Replaced
            }
            None => {
                self.reactions.insert(
                    user_id,
                    Reaction {
                        kind: kind.to_string(),
                        reacted_at: Utc::now(),
                    },
                );
                ReactionChange::Added
            }
        };

        Ok(Some(change))
    }

    /// 为单个用户隐藏消息（仅影响该用户的视图），返回是否实际发生变更
    pub fn mark_deleted_for_user(&mut self, user_id: UserId) -> bool {
        self.deleted_for_user_ids.insert(user_id)
    }

    /// 消息是否对指定用户隐藏
    pub fn is_deleted_for_user(&self, user_id: UserId) -> bool {
        self.deleted_for_user_ids.contains(&user_id)
    }

    /// 消息是否对指定用户可见（按用户隐藏轴）
    pub fn visible_to(&self, user_id: UserId) -> bool {
        !self.is_deleted_for_user(user_id)
    }

    /// 面向所有人的墓碑化（单向）
    ///
    /// 清空内容、回应与回复快照，保留外壳元数据（ID、时间戳、已读集合、
    /// 按用户隐藏集合）。重复墓碑化是无操作，返回 false。
    pub fn mark_deleted_for_everyone(&mut self, deleted_by: UserId) -> bool {
        if self.is_deleted_for_everyone {
            return false;
        }

        self.is_deleted_for_everyone = true;
        self.deleted_for_everyone_by = Some(deleted_by);
        self.deleted_for_everyone_at = Some(Utc::now());
        self.content = None;
        self.reactions.clear();
        self.reply_to = None;

        true
    }

    /// 按消息类型渲染会话预览文本
    ///
    /// 图片/语音/文件渲染为短符号而非原始内容，墓碑消息渲染为占位文案。
    pub fn render_preview(&self) -> String {
        if self.is_deleted_for_everyone {
            return REMOVED_MESSAGE_PREVIEW.to_string();
        }

        match self.message_type {
            MessageType::Image => "📷 Photo".to_string(),
            MessageType::Voice => "🎤 Voice message".to_string(),
            MessageType::File => "📎 File".to_string(),
            MessageType::Text | MessageType::System => {
                self.content.clone().unwrap_or_default()
            }
        }
    }
}
