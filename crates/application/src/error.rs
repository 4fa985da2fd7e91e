use domain::{DomainError, RepositoryError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(RepositoryError),
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl ApplicationError {
    /// 创建基础设施错误
    pub fn infrastructure(message: impl Into<String>) -> Self {
        ApplicationError::Infrastructure(message.into())
    }

    /// 提取底层领域错误（如有）
    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            ApplicationError::Domain(err) => Some(err),
            ApplicationError::Repository(RepositoryError::Domain(err)) => Some(err),
            _ => None,
        }
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        // 存储层上抛的领域错误（唯一约束冲突等）保持领域错误形态
        match value {
            RepositoryError::Domain(err) => ApplicationError::Domain(err),
            other => ApplicationError::Repository(other),
        }
    }
}

/// 应用层结果类型
pub type ApplicationResult<T> = Result<T, ApplicationError>;
