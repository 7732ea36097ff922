use domain::{DomainError, RepositoryError};
use thiserror::Error;

/// 对 UI 暴露的错误分类。除 `Backend` 外，Display 文案可直接呈现给用户。
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("authentication required")]
    Authentication,
    #[error("{field}: {message}")]
    Validation { field: String, message: String },
    #[error("permission denied: {action}")]
    Permission { action: String },
    #[error("{resource} not found")]
    NotFound { resource: String },
    #[error("chat backend unavailable: {0}")]
    Backend(#[from] RepositoryError),
}

impl ChatError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn permission(action: impl Into<String>) -> Self {
        Self::Permission {
            action: action.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }
}

impl From<DomainError> for ChatError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::InvalidArgument { field, message } => Self::Validation { field, message },
            DomainError::MessageAlreadyDeleted => {
                Self::validation("message", "already deleted")
            }
            DomainError::SystemMessageImmutable => {
                Self::validation("message", "system messages cannot be modified")
            }
        }
    }
}
