//! 身份与用户资料端口。
//!
//! 认证和资料维护属于外部协作方，本子系统只消费这两个接口。

use std::collections::HashMap;

use async_trait::async_trait;
use domain::UserId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 当前会话身份来源。
pub trait IdentityProvider: Send + Sync {
    /// 当前登录用户；无有效会话时返回 None。
    fn current_user(&self) -> Option<UserId>;
}

/// 用户展示资料。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub display_name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("profile lookup failed: {0}")]
    Lookup(String),
}

impl ProfileError {
    pub fn lookup(message: impl Into<String>) -> Self {
        Self::Lookup(message.into())
    }
}

/// 批量解析用户资料。查不到的 id 从结果中缺席即可，调用方按未解析处理。
#[async_trait]
pub trait ProfileResolver: Send + Sync {
    async fn resolve_profiles(
        &self,
        ids: &[UserId],
    ) -> Result<HashMap<UserId, UserProfile>, ProfileError>;
}
