//! 消息存储接口定义

use async_trait::async_trait;

use crate::entities::message::Message;
use crate::errors::RepositoryResult;
use crate::ids::{ConversationId, MessageId, UserId};
use crate::repositories::Pagination;

/// 消息存储接口
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// 插入新消息
    async fn insert(&self, message: &Message) -> RepositoryResult<()>;

    /// 根据ID查找消息
    async fn find_by_id(&self, id: MessageId) -> RepositoryResult<Option<Message>>;

    /// 整体替换消息
    async fn update(&self, message: &Message) -> RepositoryResult<()>;

    /// 分页获取会话消息（最新在前），排除对请求者隐藏的消息
    async fn list_by_conversation(
        &self,
        conversation_id: ConversationId,
        viewer_id: UserId,
        pagination: Pagination,
    ) -> RepositoryResult<Vec<Message>>;

    /// 在存储层原子地将消息加入用户的隐藏集合
    async fn mark_deleted_for_user(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> RepositoryResult<()>;

    /// 批量已读：将读者加入会话内所有他人发送且未读消息的已读集合
    ///
    /// 必须是单次批量操作而非逐条往返。返回实际更新的消息数。
    async fn mark_read_bulk(
        &self,
        conversation_id: ConversationId,
        reader_id: UserId,
    ) -> RepositoryResult<u64>;

    /// 统计会话内指定用户的未读消息数
    async fn count_unread(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> RepositoryResult<u64>;

    /// 统计用户在其参与的全部会话中的未读消息总数
    async fn count_total_unread(&self, user_id: UserId) -> RepositoryResult<u64>;

    /// 按会话批量删除消息（会话解散时的级联删除）。返回删除的消息数。
    async fn delete_by_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> RepositoryResult<u64>;
}
