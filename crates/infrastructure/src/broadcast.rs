//! 进程内广播通知端点
//!
//! 基于 `tokio::sync::broadcast` 的本地投递实现，供单实例部署与测试使用。
//! 订阅方（socket hub、日志等）消费 `Notification` 并负责面向连接的投递。

use application::{Notification, NotificationSink, SinkError};
use async_trait::async_trait;
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct LocalNotificationSink {
    sender: broadcast::Sender<Notification>,
}

impl LocalNotificationSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl NotificationSink for LocalNotificationSink {
    async fn deliver(&self, notification: Notification) -> Result<(), SinkError> {
        // 没有订阅者不算失败：通知本就是尽力而为
        if self.sender.receiver_count() == 0 {
            return Ok(());
        }
        self.sender
            .send(notification)
            .map_err(|err| SinkError::failed(err.to_string()))?;
        Ok(())
    }
}
