//! 用户在线状态实体定义
//!
//! 状态由当前打开的连接集合推导：`status` 为 `Online` 当且仅当最近一次
//! 成功变更时连接集合非空（收敛性而非瞬时性保证）。

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// 在线状态枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    /// 离线
    Offline,
    /// 在线
    Online,
    /// 离开
    Away,
    /// 忙碌
    Busy,
}

impl Default for PresenceStatus {
    fn default() -> Self {
        Self::Offline
    }
}

/// 用户在线状态记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPresence {
    /// 用户ID
    pub user_id: UserId,
    /// 当前状态
    pub status: PresenceStatus,
    /// 最后活跃时间（无记录的用户为 None）
    pub last_seen: Option<DateTime<Utc>>,
    /// 当前打开的连接标识集合
    #[serde(default)]
    pub connection_ids: HashSet<String>,
}

impl UserPresence {
    /// 创建在线状态记录
    pub fn online(user_id: UserId) -> Self {
        Self {
            user_id,
            status: PresenceStatus::Online,
            last_seen: Some(Utc::now()),
            connection_ids: HashSet::new(),
        }
    }

    /// 无记录用户的隐式离线状态
    pub fn offline(user_id: UserId) -> Self {
        Self {
            user_id,
            status: PresenceStatus::Offline,
            last_seen: None,
            connection_ids: HashSet::new(),
        }
    }

    /// 状态迁移并刷新最后活跃时间
    pub fn update_status(&mut self, status: PresenceStatus) {
        self.status = status;
        self.last_seen = Some(Utc::now());
    }

    /// 是否在线
    pub fn is_online(&self) -> bool {
        self.status == PresenceStatus::Online
    }
}
