//! 身份适配器。
//!
//! 真正的认证由外部身份提供方完成；这里只是一个把已知用户 id
//! 交给子系统的最小实现，宿主进程在会话建立/失效时更新它。

use std::sync::{Arc, Mutex};

use application::identity::IdentityProvider;
use domain::UserId;

#[derive(Clone)]
pub struct FixedIdentity {
    user: Arc<Mutex<Option<UserId>>>,
}

impl FixedIdentity {
    pub fn new(user: UserId) -> Self {
        Self {
            user: Arc::new(Mutex::new(Some(user))),
        }
    }

    /// 无登录会话。
    pub fn anonymous() -> Self {
        Self {
            user: Arc::new(Mutex::new(None)),
        }
    }

    pub fn set_user(&self, user: Option<UserId>) {
        *self.user.lock().unwrap() = user;
    }
}

impl IdentityProvider for FixedIdentity {
    fn current_user(&self) -> Option<UserId> {
        *self.user.lock().unwrap()
    }
}
