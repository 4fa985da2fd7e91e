//! 会话存储接口定义

use async_trait::async_trait;

use crate::entities::conversation::Conversation;
use crate::errors::RepositoryResult;
use crate::ids::{ConversationId, UserId};

/// 会话存储接口
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// 创建会话
    ///
    /// 实现应对单聊会话的规范化参与者对施加唯一约束，约束被触发时
    /// 返回 `RepositoryError::Domain(DomainError::Conflict)`，由调用方
    /// 重新读取并复用已存在的会话。
    async fn create(&self, conversation: &Conversation) -> RepositoryResult<()>;

    /// 根据ID查找会话
    async fn find_by_id(&self, id: ConversationId) -> RepositoryResult<Option<Conversation>>;

    /// 查找用户参与的全部会话
    async fn find_by_participant(&self, user_id: UserId) -> RepositoryResult<Vec<Conversation>>;

    /// 根据规范化（已排序）参与者列表查找会话，用于单聊查重
    async fn find_by_canonical_participants(
        &self,
        participant_ids: &[UserId],
        is_group: bool,
    ) -> RepositoryResult<Option<Conversation>>;

    /// 根据邀请令牌查找会话
    async fn find_by_invite_token(&self, token: &str) -> RepositoryResult<Option<Conversation>>;

    /// 整体替换会话
    async fn update(&self, conversation: &Conversation) -> RepositoryResult<()>;

    /// 删除会话
    async fn delete(&self, id: ConversationId) -> RepositoryResult<()>;
}
