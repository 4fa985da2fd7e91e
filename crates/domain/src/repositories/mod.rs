//! 存储接口定义
//!
//! 定义数据访问层的抽象接口，遵循内层定义接口、外层实现接口的原则。
//! 这里只描述核心逻辑对存储的能力需求，不约束存储的具体实现。

pub mod conversation_repository;
pub mod message_repository;

pub use conversation_repository::ConversationRepository;
pub use message_repository::MessageRepository;

/// 分页参数（最新在前的 skip/take 语义）
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub skip: usize,
    pub take: usize,
}

impl Pagination {
    pub fn new(skip: usize, take: usize) -> Self {
        Self { skip, take }
    }

    /// 默认首页：前 20 条
    pub fn first_page() -> Self {
        Self::new(0, 20)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::first_page()
    }
}
