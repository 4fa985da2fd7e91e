//! 统一配置中心
//!
//! 提供消息核心的全局配置管理，包括：
//! - Redis 连接（在线状态与通知通道）
//! - 通知广播
//! - 在线状态过期策略

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Redis配置
    pub redis: RedisConfig,
    /// 广播器配置
    pub broadcast: BroadcastConfig,
    /// 在线状态配置
    pub presence: PresenceConfig,
}

/// Redis配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

/// 广播器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// 本地广播通道容量
    pub capacity: usize,
    /// 按用户通知频道的前缀
    pub user_channel_prefix: String,
}

/// 在线状态配置
///
/// 在线记录的过期窗口以心跳间隔为上界：客户端崩溃等未调用断开的场景
/// 依靠过期回退到隐式离线。离线记录使用更长的保留期以支持"最后在线"查询。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// 在线记录过期秒数（心跳窗口）
    pub online_ttl_secs: u64,
    /// 离线记录保留秒数（最后在线历史）
    pub offline_ttl_secs: u64,
}

impl PresenceConfig {
    pub fn online_ttl(&self) -> Duration {
        Duration::from_secs(self.online_ttl_secs)
    }

    pub fn offline_ttl(&self) -> Duration {
        Duration::from_secs(self.offline_ttl_secs)
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            online_ttl_secs: 60,
            offline_ttl_secs: 86400 * 7,
        }
    }
}

impl AppConfig {
    /// 从环境变量加载配置
    ///
    /// 关键配置（REDIS_URL）缺失时 panic，确保生产环境不会落到不安全的默认值。
    pub fn from_env() -> Self {
        Self {
            redis: RedisConfig {
                url: env::var("REDIS_URL")
                    .expect("REDIS_URL environment variable is required for production safety"),
            },
            broadcast: Self::broadcast_from_env(),
            presence: Self::presence_from_env(),
        }
    }

    /// 从环境变量加载配置，开发环境版本
    ///
    /// 提供默认值，仅用于测试和开发。
    pub fn from_env_with_defaults() -> Self {
        Self {
            redis: RedisConfig {
                url: env::var("REDIS_URL")
                    .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            },
            broadcast: Self::broadcast_from_env(),
            presence: Self::presence_from_env(),
        }
    }

    fn broadcast_from_env() -> BroadcastConfig {
        BroadcastConfig {
            capacity: env::var("BROADCAST_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(256),
            user_channel_prefix: env::var("NOTIFY_CHANNEL_PREFIX")
                .unwrap_or_else(|_| "notify:user:".to_string()),
        }
    }

    fn presence_from_env() -> PresenceConfig {
        let defaults = PresenceConfig::default();
        PresenceConfig {
            online_ttl_secs: env::var("PRESENCE_ONLINE_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.online_ttl_secs),
            offline_ttl_secs: env::var("PRESENCE_OFFLINE_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.offline_ttl_secs),
        }
    }
}
