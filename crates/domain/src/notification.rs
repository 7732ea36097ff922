use crate::value_objects::{MessageId, NotificationId, RoomId, Timestamp, UserId};

/// 每条消息为房间内除发送者外的每个活跃参与者各生成一行。
/// 只有已读状态追踪会修改这些行。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    pub room_id: RoomId,
    pub message_id: MessageId,
    pub is_read: bool,
    pub read_at: Option<Timestamp>,
    /// 辅助推送渠道的投递标记，本子系统只存不发。
    pub push_sent: bool,
    pub email_sent: bool,
    pub created_at: Timestamp,
}

impl Notification {
    pub fn new(
        id: NotificationId,
        user_id: UserId,
        room_id: RoomId,
        message_id: MessageId,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            user_id,
            room_id,
            message_id,
            is_read: false,
            read_at: None,
            push_sent: false,
            email_sent: false,
            created_at,
        }
    }

    /// 标记已读。幂等：已读的行返回 false 且不做任何修改。
    pub fn mark_read(&mut self, now: Timestamp) -> bool {
        if self.is_read {
            return false;
        }
        self.is_read = true;
        self.read_at = Some(now);
        true
    }
}
