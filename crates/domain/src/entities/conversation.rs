//! 会话实体定义
//!
//! 包含单聊/群聊会话的核心信息和相关操作。
//!
//! 不变量：
//! - 单聊会话恰好有 2 个参与者，且参与者列表始终保持规范化（排序）顺序，
//!   没有邀请令牌；
//! - 群聊会话始终持有邀请令牌，创建者是永久参与者（只能解散，不能退出）。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{DomainError, DomainResult};
use crate::ids::{ConversationId, MessageId, UserId};

/// 会话的最后一条消息快照（用于会话列表预览）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastMessage {
    /// 消息ID
    pub message_id: MessageId,
    /// 按消息类型渲染后的预览文本
    pub preview: String,
    /// 消息时间
    pub sent_at: DateTime<Utc>,
}

/// 会话实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// 会话唯一ID
    pub id: ConversationId,
    /// 参与者ID集合（单聊时保持规范化排序）
    pub participant_ids: Vec<UserId>,
    /// 是否为群聊
    pub is_group: bool,
    /// 会话名称
    pub name: String,
    /// 会话描述（可选）
    pub description: Option<String>,
    /// 会话头像URL（可选）
    pub avatar_url: Option<String>,
    /// 创建者ID
    pub creator_id: UserId,
    /// 邀请令牌（仅群聊持有）
    pub invite_token: Option<String>,
    /// 最后一条消息快照（可选）
    pub last_message: Option<LastMessage>,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 更新时间
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// 创建单聊会话
    ///
    /// 参与者对会被规范化（排序），使 (A,B) 与 (B,A) 解析为同一会话。
    pub fn new_direct(participant_ids: Vec<UserId>) -> DomainResult<Self> {
        let participants = Self::canonicalize(participant_ids)?;
        if participants.len() != 2 {
            return Err(DomainError::validation(
                "participant_ids",
                "direct conversation requires exactly 2 distinct participants",
            ));
        }

        let creator_id = participants[0];
        let now = Utc::now();

        Ok(Self {
            id: ConversationId::new(Uuid::new_v4()),
            participant_ids: participants,
            is_group: false,
            name: "Chat".to_string(),
            description: None,
            avatar_url: None,
            creator_id,
            invite_token: None,
            last_message: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// 创建群聊会话
    ///
    /// 创建者自动成为参与者；邀请令牌在创建时生成。
    pub fn new_group(
        participant_ids: Vec<UserId>,
        name: Option<String>,
        creator_id: UserId,
    ) -> DomainResult<Self> {
        let mut participants = Self::canonicalize(participant_ids)?;
        if !participants.contains(&creator_id) {
            participants.push(creator_id);
            participants.sort();
        }

        let now = Utc::now();

        Ok(Self {
            id: ConversationId::new(Uuid::new_v4()),
            participant_ids: participants,
            is_group: true,
            name: name.unwrap_or_else(|| "New Group".to_string()),
            description: None,
            avatar_url: None,
            creator_id,
            invite_token: Some(Self::generate_invite_token()),
            last_message: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// 规范化参与者列表：排序并去重
    ///
    /// 空列表被拒绝。两个以任意顺序给出的相同参与者对规范化后相等，
    /// 用于单聊会话的幂等查重。
    pub fn canonicalize(mut participant_ids: Vec<UserId>) -> DomainResult<Vec<UserId>> {
        if participant_ids.is_empty() {
            return Err(DomainError::validation(
                "participant_ids",
                "cannot be empty",
            ));
        }
        participant_ids.sort();
        participant_ids.dedup();
        Ok(participant_ids)
    }

    /// 检查用户是否为当前参与者
    pub fn is_participant(&self, user_id: UserId) -> bool {
        self.participant_ids.contains(&user_id)
    }

    /// 更新会话信息
    ///
    /// 只应用实际提供且与当前值不同的字段；每个发生变化的字段贡献一条
    /// 人类可读的变更描述，供调用方合成系统消息。
    pub fn update_info(
        &mut self,
        name: Option<String>,
        description: Option<String>,
        avatar_url: Option<String>,
    ) -> Vec<String> {
        let mut changes = Vec::new();

        if let Some(name) = name {
            if !name.is_empty() && name != self.name {
                changes.push(format!("renamed the group to \"{}\"", name));
                self.name = name;
            }
        }

        if let Some(description) = description {
            if self.description.as_deref() != Some(description.as_str()) {
                changes.push("updated the group description".to_string());
                self.description = Some(description);
            }
        }

        if let Some(avatar_url) = avatar_url {
            if self.avatar_url.as_deref() != Some(avatar_url.as_str()) {
                changes.push("updated the group photo".to_string());
                self.avatar_url = Some(avatar_url);
            }
        }

        if !changes.is_empty() {
            self.updated_at = Utc::now();
        }

        changes
    }

    /// 追加参与者，返回实际新增的用户列表（已在会话中的被跳过）
    pub fn add_participants(&mut self, user_ids: &[UserId]) -> DomainResult<Vec<UserId>> {
        if !self.is_group {
            return Err(DomainError::forbidden(
                "cannot add participants to a direct conversation",
            ));
        }

        let mut added = Vec::new();
        for &user_id in user_ids {
            if !self.participant_ids.contains(&user_id) {
                self.participant_ids.push(user_id);
                added.push(user_id);
            }
        }

        if !added.is_empty() {
            self.updated_at = Utc::now();
        }

        Ok(added)
    }

    /// 移除参与者
    ///
    /// 创建者是永久参与者，不能被移除（只能解散会话）。
    /// 返回是否实际发生了移除。
    pub fn remove_participant(&mut self, user_id: UserId) -> DomainResult<bool> {
        if !self.is_group {
            return Err(DomainError::forbidden(
                "cannot remove participants from a direct conversation",
            ));
        }
        if user_id == self.creator_id {
            return Err(DomainError::forbidden("cannot remove the group creator"));
        }

        let before = self.participant_ids.len();
        self.participant_ids.retain(|id| *id != user_id);
        let removed = self.participant_ids.len() != before;

        if removed {
            self.updated_at = Utc::now();
        }

        Ok(removed)
    }

    /// 更新最后一条消息快照
    pub fn update_last_message(
        &mut self,
        message_id: MessageId,
        preview: impl Into<String>,
        sent_at: DateTime<Utc>,
    ) {
        self.last_message = Some(LastMessage {
            message_id,
            preview: preview.into(),
            sent_at,
        });
        self.updated_at = sent_at;
    }

    /// 清除最后一条消息快照
    pub fn clear_last_message(&mut self) {
        self.last_message = None;
        self.updated_at = Utc::now();
    }

    /// 重新生成邀请令牌（使旧令牌失效）
    pub fn regenerate_invite_token(&mut self) -> DomainResult<&str> {
        if !self.is_group {
            return Err(DomainError::forbidden(
                "direct conversations have no invite token",
            ));
        }
        self.invite_token = Some(Self::generate_invite_token());
        self.updated_at = Utc::now();
        Ok(self.invite_token.as_deref().unwrap_or_default())
    }

    /// 生成 12 位十六进制邀请令牌
    fn generate_invite_token() -> String {
        Uuid::new_v4().simple().to_string()[..12].to_string()
    }
}
