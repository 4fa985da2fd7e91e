//! 通知扇出
//!
//! 将一次领域变更翻译为每个接收者恰好一条的逻辑通知。扇出是纯副作用：
//! 它发生在变更持久化成功之后，且不允许使原始命令失败 —— 投递通道不可用时
//! 通知被记录并丢弃（至多一次、尽力而为）。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    ChatEvent, Conversation, ConversationId, ConversationSnapshot, DeleteScope, EventEnvelope,
    Message, MessageId, PresenceStatus, UserId,
};
use thiserror::Error;

/// 一次逻辑通知：事件信封 + 接收者集合
#[derive(Debug, Clone)]
pub struct Notification {
    pub recipients: Vec<UserId>,
    pub envelope: EventEnvelope,
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("delivery failed: {0}")]
    Failed(String),
}

impl SinkError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// 通知投递端点
///
/// fire-and-forget 能力接口：核心不关心传输是推送网关、socket hub 还是日志。
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: Notification) -> Result<(), SinkError>;
}

/// 投递扇出器
///
/// 按事件类型计算接收者集合并投递；投递失败被记录后吞掉。
#[derive(Clone)]
pub struct DeliveryFanout {
    sink: Arc<dyn NotificationSink>,
}

impl DeliveryFanout {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }

    /// 会话创建：通知全部参与者
    pub async fn conversation_created(&self, conversation: &Conversation) {
        self.dispatch(
            conversation.participant_ids.clone(),
            ChatEvent::ConversationCreated {
                conversation: ConversationSnapshot::from(conversation),
            },
        )
        .await;
    }

    /// 会话变更：通知当前参与者集合
    pub async fn conversation_updated(&self, conversation: &Conversation) {
        self.dispatch(
            conversation.participant_ids.clone(),
            ChatEvent::ConversationUpdated {
                conversation: ConversationSnapshot::from(conversation),
            },
        )
        .await;
    }

    /// 会话变更：单独通知被移除的用户
    ///
    /// 被移除者已不在参与者集合中，但其客户端需要感知自己被移出。
    pub async fn conversation_updated_for_removed(
        &self,
        conversation: &Conversation,
        removed_user: UserId,
    ) {
        self.dispatch(
            vec![removed_user],
            ChatEvent::ConversationUpdated {
                conversation: ConversationSnapshot::from(conversation),
            },
        )
        .await;
    }

    /// 会话解散：通知解散前的全部参与者
    pub async fn conversation_disbanded(
        &self,
        conversation_id: ConversationId,
        disbanded_by: UserId,
        former_participants: Vec<UserId>,
    ) {
        self.dispatch(
            former_participants,
            ChatEvent::ConversationDisbanded {
                conversation_id,
                disbanded_by,
            },
        )
        .await;
    }

    /// 新消息：恰好一条通知，扇出到全部参与者（含发送者，保证多端一致）
    pub async fn message_created(&self, conversation: &Conversation, message: &Message) {
        self.dispatch(
            conversation.participant_ids.clone(),
            ChatEvent::MessageCreated {
                message: message.clone(),
            },
        )
        .await;
    }

    /// 面向所有人的消息删除：通知全部参与者（含删除者）
    pub async fn message_deleted_for_everyone(
        &self,
        conversation: &Conversation,
        message_id: MessageId,
        deleted_by: UserId,
    ) {
        self.dispatch(
            conversation.participant_ids.clone(),
            ChatEvent::MessageDeleted {
                conversation_id: conversation.id,
                message_id,
                scope: DeleteScope::Everyone,
                deleted_by,
            },
        )
        .await;
    }

    /// 按用户删除：仅通知请求者本人
    pub async fn message_deleted_for_me(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        user_id: UserId,
    ) {
        self.dispatch(
            vec![user_id],
            ChatEvent::MessageDeleted {
                conversation_id,
                message_id,
                scope: DeleteScope::Me,
                deleted_by: user_id,
            },
        )
        .await;
    }

    /// 表情回应变更：通知全部参与者
    pub async fn message_reacted(
        &self,
        conversation: &Conversation,
        message_id: MessageId,
        user_id: UserId,
        kind: &str,
    ) {
        self.dispatch(
            conversation.participant_ids.clone(),
            ChatEvent::MessageReacted {
                conversation_id: conversation.id,
                message_id,
                user_id,
                kind: kind.to_string(),
                reacted_at: Utc::now(),
            },
        )
        .await;
    }

    /// 在线状态变更：接收者集合由调用方决定（关注者、好友等由外层解析）
    pub async fn presence_changed(
        &self,
        user_id: UserId,
        status: PresenceStatus,
        last_seen: Option<DateTime<Utc>>,
        recipients: Vec<UserId>,
    ) {
        self.dispatch(
            recipients,
            ChatEvent::PresenceChanged {
                user_id,
                status,
                last_seen,
            },
        )
        .await;
    }

    async fn dispatch(&self, recipients: Vec<UserId>, event: ChatEvent) {
        if recipients.is_empty() {
            return;
        }

        let event_type = event.event_type();
        let notification = Notification {
            recipients,
            envelope: EventEnvelope::new(event),
        };

        if let Err(err) = self.sink.deliver(notification).await {
            tracing::warn!(
                event = event_type,
                error = %err,
                "notification dropped"
            );
        }
    }
}

/// 内存实现的收集型投递端点（用于测试）
pub mod memory {
    use super::*;
    use tokio::sync::Mutex;

    /// 记录所有投递的通知，供断言扇出规则
    #[derive(Default)]
    pub struct RecordingSink {
        notifications: Mutex<Vec<Notification>>,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        /// 取出已记录的全部通知
        pub async fn drain(&self) -> Vec<Notification> {
            std::mem::take(&mut *self.notifications.lock().await)
        }

        /// 当前记录的通知快照
        pub async fn notifications(&self) -> Vec<Notification> {
            self.notifications.lock().await.clone()
        }
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn deliver(&self, notification: Notification) -> Result<(), SinkError> {
            self.notifications.lock().await.push(notification);
            Ok(())
        }
    }

    /// 永远失败的投递端点（用于验证扇出失败不会影响已提交的变更）
    #[derive(Default)]
    pub struct FailingSink;

    #[async_trait]
    impl NotificationSink for FailingSink {
        async fn deliver(&self, _notification: Notification) -> Result<(), SinkError> {
            Err(SinkError::failed("transport unavailable"))
        }
    }
}
