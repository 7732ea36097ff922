//! 已读状态追踪。

use std::collections::HashMap;
use std::sync::Arc;

use domain::{RoomId, UserId};

use crate::clock::Clock;
use crate::error::ChatError;
use crate::identity::IdentityProvider;
use crate::repository::{NotificationRepository, ParticipantRepository};

pub struct ReadStateServiceDependencies {
    pub identity: Arc<dyn IdentityProvider>,
    pub participants: Arc<dyn ParticipantRepository>,
    pub notifications: Arc<dyn NotificationRepository>,
    pub clock: Arc<dyn Clock>,
}

pub struct ReadStateService {
    deps: ReadStateServiceDependencies,
}

impl ReadStateService {
    pub fn new(deps: ReadStateServiceDependencies) -> Self {
        Self { deps }
    }

    fn require_user(&self) -> Result<UserId, ChatError> {
        self.deps
            .identity
            .current_user()
            .ok_or(ChatError::Authentication)
    }

    /// 把调用者在该房间的全部未读通知置为已读，并更新参与者行的
    /// last_read_at。幂等：没有未读行时直接返回，什么都不写。
    pub async fn mark_read(&self, room_id: RoomId) -> Result<(), ChatError> {
        let caller = self.require_user()?;
        let now = self.deps.clock.now();

        let flipped = self
            .deps
            .notifications
            .mark_room_read(caller, room_id, now)
            .await?;
        if flipped > 0 {
            self.deps
                .participants
                .set_last_read(room_id, caller, now)
                .await?;
        }
        Ok(())
    }

    /// 房间 id → 未读数，用于房间列表角标。
    pub async fn unread_counts(&self) -> Result<HashMap<RoomId, u64>, ChatError> {
        let caller = self.require_user()?;
        Ok(self.deps.notifications.count_unread(caller).await?)
    }
}
