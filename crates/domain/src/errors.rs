use thiserror::Error;

/// 领域规则错误。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid {field}: {message}")]
    InvalidArgument { field: String, message: String },

    #[error("message is already deleted")]
    MessageAlreadyDeleted,

    #[error("system messages cannot be modified")]
    SystemMessageImmutable,
}

impl DomainError {
    pub fn invalid_argument(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// 仓储层错误，持久化网关的所有实现共用。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// 后端不可达或查询执行失败。
    #[error("storage error: {message}")]
    Storage { message: String },

    /// 存储中的行无法还原成合法的领域对象。
    #[error("invalid stored data: {message}")]
    InvalidData { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;
