use crate::value_objects::{RoomId, Timestamp, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[sqlx(type_name = "participant_role", rename_all = "lowercase")]
pub enum ParticipantRole {
    Owner,
    Admin,
    Member,
}

impl ParticipantRole {
    /// 普通成员默认不能拉人，其余角色可以。
    pub fn default_can_add_participants(&self) -> bool {
        !matches!(self, ParticipantRole::Member)
    }
}

/// 参与者个人的通知偏好，只影响辅助推送渠道，不影响未读计数。
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NotificationPreferences {
    pub muted: bool,
    pub sound: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            muted: false,
            sound: true,
        }
    }
}

/// 用户在某个房间的成员资格记录，复合主键 (room_id, user_id)。
///
/// 离开房间只会置 `is_active = false`，成员历史永不删除。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Participant {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub role: ParticipantRole,
    pub can_send_messages: bool,
    pub can_add_participants: bool,
    pub joined_at: Timestamp,
    pub last_read_at: Option<Timestamp>,
    pub is_active: bool,
    pub preferences: NotificationPreferences,
}

impl Participant {
    pub fn new(room_id: RoomId, user_id: UserId, role: ParticipantRole, joined_at: Timestamp) -> Self {
        Self {
            room_id,
            user_id,
            role,
            can_send_messages: true,
            can_add_participants: role.default_can_add_participants(),
            joined_at,
            last_read_at: None,
            is_active: true,
            preferences: NotificationPreferences::default(),
        }
    }

    pub fn deactivate(&mut self) {
        self.is_active = false;
    }

    pub fn record_read(&mut self, now: Timestamp) {
        self.last_read_at = Some(now);
    }
}
