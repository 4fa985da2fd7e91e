//! 领域模型错误定义
//!
//! 定义了系统中所有可能的错误类型，提供清晰的错误上下文。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 输入验证错误（在触达存储层之前拒绝）
    #[error("validation failed: {field}: {message}")]
    Validation { field: String, message: String },

    /// 资源不存在错误
    #[error("not found: {resource_type} {resource_id}")]
    NotFound {
        resource_type: String,
        resource_id: String,
    },

    /// 权限错误（非创建者执行结构性变更、非发送者撤回等）
    #[error("forbidden: {action}")]
    Forbidden { action: String },

    /// 并发冲突错误（例如规范化参与者对的唯一约束被触发）
    #[error("conflict: {message}")]
    Conflict { message: String },
}

impl DomainError {
    /// 创建验证错误
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// 创建资源不存在错误
    pub fn not_found(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
        }
    }

    /// 创建权限错误
    pub fn forbidden(action: impl Into<String>) -> Self {
        Self::Forbidden {
            action: action.into(),
        }
    }

    /// 创建冲突错误
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// 是否为冲突错误
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// 存储层错误类型
///
/// 领域错误与存储错误分离：存储接口既可能返回领域冲突（唯一约束），
/// 也可能返回底层存储故障。
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// 领域层可识别的错误（唯一约束冲突等）
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// 底层存储故障
    #[error("storage failure: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    /// 创建存储故障错误
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;

/// 存储层结果类型
pub type RepositoryResult<T> = Result<T, RepositoryError>;
