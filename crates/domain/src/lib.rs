//! 即时通讯系统核心领域模型
//!
//! 包含会话、消息、在线状态等核心实体，以及相关的业务规则和存储接口。

pub mod entities;
pub mod errors;
pub mod events;
pub mod ids;
pub mod repositories;

// 重新导出常用类型
pub use entities::*;
pub use errors::*;
pub use events::*;
pub use ids::*;
pub use repositories::*;
