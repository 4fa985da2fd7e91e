//! 消息核心应用层
//!
//! 将领域实体的状态迁移组织为原子操作：校验 -> 变更 -> 持久化 -> 扇出。
//! 通知扇出只在持久化成功之后发生，并且永远不会使已提交的变更失败。

pub mod error;
pub mod fanout;
pub mod presence;
pub mod services;

pub use error::{ApplicationError, ApplicationResult};
pub use fanout::{DeliveryFanout, Notification, NotificationSink, SinkError};
pub use presence::{PresenceStore, PresenceTracker, RedisPresenceStore};
pub use services::{
    ConversationService, CreateConversationCommand, MessageService, SendMessageCommand,
    UpdateConversationInfoCommand,
};
