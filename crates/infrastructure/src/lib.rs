//! 基础设施层
//!
//! 提供应用层接口的具体适配器：进程内广播通知端点与 Redis 发布通知端点。
//! 在线状态的 Redis 存储实现位于应用层（与其接口同文件），这里只承载
//! 面向外部传输的适配器。

pub mod broadcast;
pub mod redis_sink;

pub use broadcast::LocalNotificationSink;
pub use redis_sink::RedisNotificationSink;
