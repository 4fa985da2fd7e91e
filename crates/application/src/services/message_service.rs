//! 消息处理服务
//!
//! 实现消息的核心业务逻辑：发送、表情回应、已读跟踪和两条独立的
//! 软删除轴。每个操作都是"校验 -> 变更 -> 持久化 -> 扇出"的原子流程，
//! 扇出永远发生在持久化成功之后。

use std::sync::Arc;

use chrono::Utc;
use domain::{
    message::REMOVED_MESSAGE_PREVIEW, ConversationRepository, DomainError, Message, MessageId,
    MessageRepository, MessageType, Pagination, ReplySnapshot, UserId,
};
use domain::ConversationId;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ApplicationResult;
use crate::fanout::DeliveryFanout;

/// 发送消息命令
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageCommand {
    /// 会话ID
    pub conversation_id: ConversationId,
    /// 发送者ID
    pub sender_id: UserId,
    /// 消息内容
    pub content: String,
    /// 消息类型
    pub message_type: MessageType,
    /// 回复快照（回复发生时由调用方固化）
    pub reply_to: Option<ReplySnapshot>,
}

/// 消息服务
pub struct MessageService {
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
    fanout: DeliveryFanout,
}

impl MessageService {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
        fanout: DeliveryFanout,
    ) -> Self {
        Self {
            conversations,
            messages,
            fanout,
        }
    }

    /// 发送消息
    ///
    /// 持久化消息，按消息类型渲染并刷新会话预览，然后向全部参与者
    /// （含发送者，保证多端一致）扇出恰好一条新消息通知。
    pub async fn send_message(&self, command: SendMessageCommand) -> ApplicationResult<MessageId> {
        let mut conversation = self
            .conversations
            .find_by_id(command.conversation_id)
            .await?
            .ok_or_else(|| {
                DomainError::not_found("conversation", command.conversation_id.to_string())
            })?;

        if !conversation.is_participant(command.sender_id) {
            return Err(DomainError::forbidden(
                "you are no longer a participant in this conversation",
            )
            .into());
        }

        let message = Message::new(
            conversation.id,
            command.sender_id,
            command.content,
            command.message_type,
            command.reply_to,
        )?;
        self.messages.insert(&message).await?;

        conversation.update_last_message(message.id, message.render_preview(), message.created_at);
        self.conversations.update(&conversation).await?;

        info!(
            conversation_id = %conversation.id,
            message_id = %message.id,
            "message sent"
        );
        self.fanout.message_created(&conversation, &message).await;

        Ok(message.id)
    }

    /// 表情回应的幂等切换
    ///
    /// 回应是非关键操作：消息不存在时静默无操作而非报错（尽力而为）。
    pub async fn react_to_message(
        &self,
        message_id: MessageId,
        user_id: UserId,
        kind: &str,
    ) -> ApplicationResult<()> {
        let Some(mut message) = self.messages.find_by_id(message_id).await? else {
            debug!(message_id = %message_id, "reaction on missing message ignored");
            return Ok(());
        };

        let Some(_change) = message.react(user_id, kind)? else {
            // 墓碑消息不再接受回应
            return Ok(());
        };
        self.messages.update(&message).await?;

        if let Some(conversation) = self
            .conversations
            .find_by_id(message.conversation_id)
            .await?
        {
            self.fanout
                .message_reacted(&conversation, message_id, user_id, kind)
                .await;
        }

        Ok(())
    }

    /// 批量已读：将用户加入会话内所有他人发送且未读消息的已读集合
    ///
    /// 单次批量操作，幂等。返回实际更新的消息数。
    pub async fn mark_conversation_read(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> ApplicationResult<u64> {
        let updated = self
            .messages
            .mark_read_bulk(conversation_id, user_id)
            .await?;
        if updated > 0 {
            debug!(
                conversation_id = %conversation_id,
                user_id = %user_id,
                updated,
                "conversation marked read"
            );
        }
        Ok(updated)
    }

    /// 为请求者本地隐藏消息
    ///
    /// 纯按用户的视图过滤，不影响其他参与者；删除通知（scope=me）
    /// 只发给请求者本人。
    pub async fn delete_message_for_user(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> ApplicationResult<()> {
        let message = self
            .messages
            .find_by_id(message_id)
            .await?
            .ok_or_else(|| DomainError::not_found("message", message_id.to_string()))?;

        self.messages
            .mark_deleted_for_user(message_id, user_id)
            .await?;

        self.fanout
            .message_deleted_for_me(message.conversation_id, message_id, user_id)
            .await;

        Ok(())
    }

    /// 面向所有人的消息删除（仅发送者）
    ///
    /// 应用墓碑不变量；若被删消息恰为会话的最后消息预览，预览被改写为
    /// 占位文案（而非保留过期内容或清空）。产生两类通知：仅在预览被
    /// 改写时发会话更新通知，以及面向全部参与者（含删除者）的
    /// scope=everyone 删除通知。重复删除是幂等无操作。
    pub async fn delete_message_for_everyone(
        &self,
        message_id: MessageId,
        requester_id: UserId,
    ) -> ApplicationResult<()> {
        let mut message = self
            .messages
            .find_by_id(message_id)
            .await?
            .ok_or_else(|| DomainError::not_found("message", message_id.to_string()))?;

        if message.sender_id != requester_id {
            return Err(DomainError::forbidden(
                "only the sender can delete a message for everyone",
            )
            .into());
        }

        if !message.mark_deleted_for_everyone(requester_id) {
            return Ok(());
        }
        self.messages.update(&message).await?;

        info!(message_id = %message_id, "message deleted for everyone");

        if let Some(mut conversation) = self
            .conversations
            .find_by_id(message.conversation_id)
            .await?
        {
            let was_last_message = conversation
                .last_message
                .as_ref()
                .map(|last| last.message_id == message_id)
                .unwrap_or(false);

            if was_last_message {
                conversation.update_last_message(message_id, REMOVED_MESSAGE_PREVIEW, Utc::now());
                self.conversations.update(&conversation).await?;
                self.fanout.conversation_updated(&conversation).await;
            }

            self.fanout
                .message_deleted_for_everyone(&conversation, message_id, requester_id)
                .await;
        }

        Ok(())
    }

    /// 分页获取会话消息（最新在前），排除对请求者隐藏的消息
    pub async fn get_messages(
        &self,
        conversation_id: ConversationId,
        viewer_id: UserId,
        pagination: Pagination,
    ) -> ApplicationResult<Vec<Message>> {
        Ok(self
            .messages
            .list_by_conversation(conversation_id, viewer_id, pagination)
            .await?)
    }

    /// 会话内指定用户的未读消息数
    pub async fn unread_count(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> ApplicationResult<u64> {
        Ok(self.messages.count_unread(conversation_id, user_id).await?)
    }

    /// 用户在其参与的全部会话中的未读消息总数
    pub async fn total_unread_count(&self, user_id: UserId) -> ApplicationResult<u64> {
        Ok(self.messages.count_total_unread(user_id).await?)
    }
}
