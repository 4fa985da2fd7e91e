//! Redis 通知端点
//!
//! 将事件信封以 JSON 发布到按用户划分的 Redis 频道
//! （`notify:user:{user_id}`），供跨实例的 socket hub 订阅后投递到连接。
//! 投递是尽力而为：没有订阅者的频道上的发布照常成功。

use std::sync::Arc;

use application::{Notification, NotificationSink, SinkError};
use async_trait::async_trait;
use config::BroadcastConfig;
use domain::UserId;
use tracing::debug;

pub struct RedisNotificationSink {
    redis_client: Arc<redis::Client>,
    user_channel_prefix: String,
}

impl RedisNotificationSink {
    pub fn new(redis_client: Arc<redis::Client>, config: &BroadcastConfig) -> Self {
        Self {
            redis_client,
            user_channel_prefix: config.user_channel_prefix.clone(),
        }
    }

    /// 生成按用户的通知频道名
    fn user_channel(&self, user_id: UserId) -> String {
        format!("{}{}", self.user_channel_prefix, user_id)
    }
}

#[async_trait]
impl NotificationSink for RedisNotificationSink {
    async fn deliver(&self, notification: Notification) -> Result<(), SinkError> {
        let payload = serde_json::to_string(&notification.envelope)
            .map_err(|err| SinkError::failed(format!("envelope serialization failed: {err}")))?;

        let mut conn = self
            .redis_client
            .get_multiplexed_async_connection()
            .await
            .map_err(|err| SinkError::failed(format!("Redis connection failed: {err}")))?;

        // 每个接收者一个频道，一次管道批量发布
        let mut pipe = redis::pipe();
        for recipient in &notification.recipients {
            pipe.publish(self.user_channel(*recipient), &payload);
        }

        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|err| SinkError::failed(format!("Redis publish failed: {err}")))?;

        debug!(
            event = notification.envelope.event.event_type(),
            recipients = notification.recipients.len(),
            "notification published"
        );

        Ok(())
    }
}
