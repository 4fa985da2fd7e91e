//! 在线状态跟踪
//!
//! 状态机（每用户）：`Unknown(无记录) -> Online(连接数>=1) -> Offline(连接数==0)`。
//! 同一用户可同时持有任意多个连接（多设备/多标签页），只有最后一个连接
//! 关闭时才发生 online -> offline 迁移。
//!
//! 并发约束：断开时"移除连接 + 读取剩余数量"必须是单个原子步骤
//! （Redis 实现使用 MULTI/EXEC，内存实现在同一临界区内完成），
//! 否则两个近同时的断开会丢失 Offline 迁移或重复广播。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use config::PresenceConfig;
use domain::{PresenceStatus, UserId, UserPresence};

use crate::error::{ApplicationError, ApplicationResult};

/// 在线状态存储接口
///
/// 以具备原生原子集合与过期原语的键值服务为后端。多实例部署时
/// 进程内存不可作为真相源，真相始终在共享存储中。
#[async_trait::async_trait]
pub trait PresenceStore: Send + Sync {
    /// 将连接加入用户的连接集合并刷新集合过期窗口
    async fn add_connection(
        &self,
        user_id: UserId,
        connection_id: &str,
        ttl: Duration,
    ) -> ApplicationResult<()>;

    /// 原子地移除连接并返回移除后的剩余连接数
    ///
    /// 移除与计数必须是同一个原子步骤，不能是两次顺序调用。
    async fn remove_connection(
        &self,
        user_id: UserId,
        connection_id: &str,
    ) -> ApplicationResult<u64>;

    /// 获取用户当前的连接集合
    async fn connections(&self, user_id: UserId) -> ApplicationResult<HashSet<String>>;

    /// 读取状态记录（过期或不存在返回 None）
    async fn get_record(&self, user_id: UserId) -> ApplicationResult<Option<UserPresence>>;

    /// 写入状态记录并设置过期窗口
    async fn set_record(&self, record: &UserPresence, ttl: Duration) -> ApplicationResult<()>;

    /// 刷新记录与连接集合的过期窗口
    async fn refresh_expiry(&self, user_id: UserId, ttl: Duration) -> ApplicationResult<()>;

    /// 清空用户的连接集合
    async fn clear_connections(&self, user_id: UserId) -> ApplicationResult<()>;
}

/// Redis实现的在线状态存储
pub struct RedisPresenceStore {
    redis_client: Arc<redis::Client>,
}

impl RedisPresenceStore {
    pub fn new(redis_client: Arc<redis::Client>) -> Self {
        Self { redis_client }
    }

    /// 生成状态记录的Redis键
    fn presence_key(&self, user_id: UserId) -> String {
        format!("presence:{}", user_id)
    }

    /// 生成连接集合的Redis键
    fn connections_key(&self, user_id: UserId) -> String {
        format!("presence:connections:{}", user_id)
    }

    /// 获取连接
    async fn get_connection(&self) -> ApplicationResult<redis::aio::MultiplexedConnection> {
        self.redis_client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| ApplicationError::infrastructure(format!("Redis connection failed: {e}")))
    }
}

fn map_redis_err(e: redis::RedisError) -> ApplicationError {
    ApplicationError::infrastructure(format!("Redis operation failed: {e}"))
}

#[async_trait::async_trait]
impl PresenceStore for RedisPresenceStore {
    async fn add_connection(
        &self,
        user_id: UserId,
        connection_id: &str,
        ttl: Duration,
    ) -> ApplicationResult<()> {
        let mut conn = self.get_connection().await?;
        let key = self.connections_key(user_id);

        let _: () = redis::pipe()
            .sadd(&key, connection_id)
            .expire(&key, ttl.as_secs() as i64)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_err)?;

        Ok(())
    }

    async fn remove_connection(
        &self,
        user_id: UserId,
        connection_id: &str,
    ) -> ApplicationResult<u64> {
        let mut conn = self.get_connection().await?;
        let key = self.connections_key(user_id);

        // MULTI/EXEC：移除与基数读取在同一原子步骤内完成
        let (_removed, remaining): (u64, u64) = redis::pipe()
            .atomic()
            .srem(&key, connection_id)
            .scard(&key)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_err)?;

        Ok(remaining)
    }

    async fn connections(&self, user_id: UserId) -> ApplicationResult<HashSet<String>> {
        let mut conn = self.get_connection().await?;
        let key = self.connections_key(user_id);

        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_err)?;

        Ok(members.into_iter().collect())
    }

    async fn get_record(&self, user_id: UserId) -> ApplicationResult<Option<UserPresence>> {
        let mut conn = self.get_connection().await?;
        let key = self.presence_key(user_id);

        let value: Option<String> = redis::cmd("GET")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_err)?;

        match value {
            Some(json) => {
                let record = serde_json::from_str(&json).map_err(|e| {
                    ApplicationError::infrastructure(format!("invalid presence record: {e}"))
                })?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn set_record(&self, record: &UserPresence, ttl: Duration) -> ApplicationResult<()> {
        let mut conn = self.get_connection().await?;
        let key = self.presence_key(record.user_id);

        let json = serde_json::to_string(record).map_err(|e| {
            ApplicationError::infrastructure(format!("presence serialization failed: {e}"))
        })?;

        let _: () = redis::cmd("SET")
            .arg(&key)
            .arg(json)
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await
            .map_err(map_redis_err)?;

        Ok(())
    }

    async fn refresh_expiry(&self, user_id: UserId, ttl: Duration) -> ApplicationResult<()> {
        let mut conn = self.get_connection().await?;
        let presence_key = self.presence_key(user_id);
        let connections_key = self.connections_key(user_id);
        let secs = ttl.as_secs() as i64;

        let _: () = redis::pipe()
            .expire(&presence_key, secs)
            .expire(&connections_key, secs)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_err)?;

        Ok(())
    }

    async fn clear_connections(&self, user_id: UserId) -> ApplicationResult<()> {
        let mut conn = self.get_connection().await?;
        let key = self.connections_key(user_id);

        let _: () = redis::cmd("DEL")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_err)?;

        Ok(())
    }
}

/// 内存实现的在线状态存储（用于测试）
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::time::Instant;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Entry {
        connections: HashSet<String>,
        connections_deadline: Option<Instant>,
        record: Option<(UserPresence, Instant)>,
    }

    impl Entry {
        /// 清理已过期的连接集合与记录
        fn purge_expired(&mut self, now: Instant) {
            if matches!(self.connections_deadline, Some(deadline) if deadline <= now) {
                self.connections.clear();
                self.connections_deadline = None;
            }
            if matches!(self.record, Some((_, deadline)) if deadline <= now) {
                self.record = None;
            }
        }
    }

    #[derive(Default)]
    pub struct MemoryPresenceStore {
        entries: Mutex<HashMap<UserId, Entry>>,
    }

    impl MemoryPresenceStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait::async_trait]
    impl PresenceStore for MemoryPresenceStore {
        async fn add_connection(
            &self,
            user_id: UserId,
            connection_id: &str,
            ttl: Duration,
        ) -> ApplicationResult<()> {
            let mut entries = self.entries.lock().await;
            let entry = entries.entry(user_id).or_default();
            let now = Instant::now();
            entry.purge_expired(now);
            entry.connections.insert(connection_id.to_string());
            entry.connections_deadline = Some(now + ttl);
            Ok(())
        }

        async fn remove_connection(
            &self,
            user_id: UserId,
            connection_id: &str,
        ) -> ApplicationResult<u64> {
            // 互斥锁内完成移除与计数，对调用方表现为单个原子步骤
            let mut entries = self.entries.lock().await;
            let entry = entries.entry(user_id).or_default();
            entry.purge_expired(Instant::now());
            entry.connections.remove(connection_id);
            Ok(entry.connections.len() as u64)
        }

        async fn connections(&self, user_id: UserId) -> ApplicationResult<HashSet<String>> {
            let mut entries = self.entries.lock().await;
            let entry = entries.entry(user_id).or_default();
            entry.purge_expired(Instant::now());
            Ok(entry.connections.clone())
        }

        async fn get_record(&self, user_id: UserId) -> ApplicationResult<Option<UserPresence>> {
            let mut entries = self.entries.lock().await;
            let entry = entries.entry(user_id).or_default();
            entry.purge_expired(Instant::now());
            Ok(entry.record.as_ref().map(|(record, _)| record.clone()))
        }

        async fn set_record(&self, record: &UserPresence, ttl: Duration) -> ApplicationResult<()> {
            let mut entries = self.entries.lock().await;
            let entry = entries.entry(record.user_id).or_default();
            entry.record = Some((record.clone(), Instant::now() + ttl));
            Ok(())
        }

        async fn refresh_expiry(&self, user_id: UserId, ttl: Duration) -> ApplicationResult<()> {
            let mut entries = self.entries.lock().await;
            let entry = entries.entry(user_id).or_default();
            let deadline = Instant::now() + ttl;
            if !entry.connections.is_empty() {
                entry.connections_deadline = Some(deadline);
            }
            if let Some((_, record_deadline)) = entry.record.as_mut() {
                *record_deadline = deadline;
            }
            Ok(())
        }

        async fn clear_connections(&self, user_id: UserId) -> ApplicationResult<()> {
            let mut entries = self.entries.lock().await;
            let entry = entries.entry(user_id).or_default();
            entry.connections.clear();
            entry.connections_deadline = None;
            Ok(())
        }
    }
}

/// 在线状态跟踪器
///
/// 连接生命周期（connect/heartbeat/disconnect）与 online -> offline
/// 迁移策略的唯一入口。
pub struct PresenceTracker {
    store: Arc<dyn PresenceStore>,
    config: PresenceConfig,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn PresenceStore>, config: PresenceConfig) -> Self {
        Self { store, config }
    }

    /// 用户新连接建立
    ///
    /// 加入连接集合、状态置为在线、刷新最后活跃时间与过期窗口。
    pub async fn connect(&self, user_id: UserId, connection_id: &str) -> ApplicationResult<()> {
        self.store
            .add_connection(user_id, connection_id, self.config.online_ttl())
            .await?;

        let record = UserPresence::online(user_id);
        self.store
            .set_record(&record, self.config.online_ttl())
            .await?;

        tracing::info!(
            user_id = %user_id,
            connection_id = connection_id,
            "presence connection established"
        );

        Ok(())
    }

    /// 心跳：等价于重新断言 connect，刷新过期窗口（幂等）
    pub async fn heartbeat(&self, user_id: UserId, connection_id: &str) -> ApplicationResult<()> {
        self.connect(user_id, connection_id).await
    }

    /// 连接断开
    ///
    /// 仅当连接集合因此变空时才迁移到离线（离线记录使用更长的保留期，
    /// 供"最后在线"查询）。返回本次断开是否触发了真正的 online -> offline
    /// 迁移，调用方据此保证"用户离线"事件每次真迁移至多广播一次。
    pub async fn disconnect(
        &self,
        user_id: UserId,
        connection_id: &str,
    ) -> ApplicationResult<bool> {
        let remaining = self
            .store
            .remove_connection(user_id, connection_id)
            .await?;

        if remaining == 0 {
            if let Some(mut record) = self.store.get_record(user_id).await? {
                record.update_status(PresenceStatus::Offline);
                record.connection_ids.clear();
                self.store
                    .set_record(&record, self.config.offline_ttl())
                    .await?;
            }
            self.store.clear_connections(user_id).await?;

            tracing::info!(user_id = %user_id, "user transitioned offline");
            Ok(true)
        } else {
            // 其他设备仍在线，只刷新过期窗口
            self.store
                .refresh_expiry(user_id, self.config.online_ttl())
                .await?;
            Ok(false)
        }
    }

    /// 查询单个用户的在线状态
    ///
    /// 无记录（从未上线或已过期）报告为隐式离线，last_seen 未知。
    pub async fn get_presence(&self, user_id: UserId) -> ApplicationResult<UserPresence> {
        match self.store.get_record(user_id).await? {
            Some(mut record) => {
                record.connection_ids = self.store.connections(user_id).await?;
                Ok(record)
            }
            None => Ok(UserPresence::offline(user_id)),
        }
    }

    /// 批量查询在线状态，每个请求的用户都有对应条目
    pub async fn get_presences(
        &self,
        user_ids: &[UserId],
    ) -> ApplicationResult<Vec<UserPresence>> {
        let mut result = Vec::with_capacity(user_ids.len());
        for &user_id in user_ids {
            result.push(self.get_presence(user_id).await?);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryPresenceStore;
    use super::*;
    use uuid::Uuid;

    fn tracker() -> PresenceTracker {
        PresenceTracker::new(Arc::new(MemoryPresenceStore::new()), PresenceConfig::default())
    }

    fn user() -> UserId {
        UserId::new(Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_connect_sets_online() {
        let tracker = tracker();
        let user_id = user();

        tracker.connect(user_id, "conn-1").await.unwrap();

        let presence = tracker.get_presence(user_id).await.unwrap();
        assert_eq!(presence.status, PresenceStatus::Online);
        assert!(presence.last_seen.is_some());
        assert!(presence.connection_ids.contains("conn-1"));
    }

    #[tokio::test]
    async fn test_unknown_user_is_implicit_offline() {
        let tracker = tracker();
        let presence = tracker.get_presence(user()).await.unwrap();

        assert_eq!(presence.status, PresenceStatus::Offline);
        assert!(presence.last_seen.is_none());
        assert!(presence.connection_ids.is_empty());
    }

    #[tokio::test]
    async fn test_multi_connection_offline_transition_fires_once() {
        let tracker = tracker();
        let user_id = user();

        tracker.connect(user_id, "conn-1").await.unwrap();
        tracker.connect(user_id, "conn-2").await.unwrap();

        // 断开第一个连接：仍在线，不触发迁移
        let went_offline = tracker.disconnect(user_id, "conn-1").await.unwrap();
        assert!(!went_offline);
        let presence = tracker.get_presence(user_id).await.unwrap();
        assert_eq!(presence.status, PresenceStatus::Online);

        // 断开最后一个连接：恰好一次 online -> offline 迁移
        let went_offline = tracker.disconnect(user_id, "conn-2").await.unwrap();
        assert!(went_offline);
        let presence = tracker.get_presence(user_id).await.unwrap();
        assert_eq!(presence.status, PresenceStatus::Offline);
        // 离线后最后在线时间仍可查询
        assert!(presence.last_seen.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_disconnects_single_transition() {
        let tracker = Arc::new(tracker());
        let user_id = user();

        tracker.connect(user_id, "conn-1").await.unwrap();
        tracker.connect(user_id, "conn-2").await.unwrap();

        let t1 = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move { tracker.disconnect(user_id, "conn-1").await.unwrap() })
        };
        let t2 = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move { tracker.disconnect(user_id, "conn-2").await.unwrap() })
        };

        let (r1, r2) = (t1.await.unwrap(), t2.await.unwrap());

        // 两个并发断开中恰好一个观察到真迁移
        assert!(r1 ^ r2);
    }

    #[tokio::test]
    async fn test_heartbeat_is_idempotent() {
        let tracker = tracker();
        let user_id = user();

        tracker.connect(user_id, "conn-1").await.unwrap();
        tracker.heartbeat(user_id, "conn-1").await.unwrap();
        tracker.heartbeat(user_id, "conn-1").await.unwrap();

        let presence = tracker.get_presence(user_id).await.unwrap();
        // 心跳不改变连接集合的成员语义
        assert_eq!(presence.connection_ids.len(), 1);
        assert_eq!(presence.status, PresenceStatus::Online);
    }

    #[tokio::test]
    async fn test_reconnect_after_offline() {
        let tracker = tracker();
        let user_id = user();

        tracker.connect(user_id, "conn-1").await.unwrap();
        assert!(tracker.disconnect(user_id, "conn-1").await.unwrap());

        tracker.connect(user_id, "conn-2").await.unwrap();
        let presence = tracker.get_presence(user_id).await.unwrap();
        assert_eq!(presence.status, PresenceStatus::Online);
    }

    #[tokio::test]
    async fn test_online_record_expires_without_heartbeat() {
        let config = PresenceConfig {
            online_ttl_secs: 0,
            offline_ttl_secs: 604800,
        };
        let tracker = PresenceTracker::new(Arc::new(MemoryPresenceStore::new()), config);
        let user_id = user();

        tracker.connect(user_id, "conn-1").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        // 未收到心跳的崩溃客户端回退到隐式离线
        let presence = tracker.get_presence(user_id).await.unwrap();
        assert_eq!(presence.status, PresenceStatus::Offline);
        assert!(presence.connection_ids.is_empty());
    }

    #[tokio::test]
    async fn test_get_presences_reports_every_requested_user() {
        let tracker = tracker();
        let online_user = user();
        let offline_user = user();

        tracker.connect(online_user, "conn-1").await.unwrap();

        let presences = tracker
            .get_presences(&[online_user, offline_user])
            .await
            .unwrap();

        assert_eq!(presences.len(), 2);
        assert_eq!(presences[0].status, PresenceStatus::Online);
        assert_eq!(presences[1].status, PresenceStatus::Offline);
    }
}
