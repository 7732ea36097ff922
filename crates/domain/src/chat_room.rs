use crate::errors::DomainError;
use crate::value_objects::{RoomId, Timestamp, TripId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[sqlx(type_name = "room_kind", rename_all = "lowercase")]
pub enum RoomKind {
    Direct,
    Group,
    Trip,
}

/// 单聊房间在整个生命周期内恰好 2 个活跃参与者。
pub const DIRECT_ROOM_CAPACITY: u32 = 2;
pub const GROUP_ROOM_CAPACITY: u32 = 50;
pub const TRIP_ROOM_CAPACITY: u32 = 100;

const MAX_NAME_LEN: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChatRoom {
    pub id: RoomId,
    pub name: Option<String>,
    pub description: Option<String>,
    pub kind: RoomKind,
    pub trip_id: Option<TripId>,
    pub is_private: bool,
    pub max_participants: u32,
    pub created_by: UserId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl ChatRoom {
    /// 单聊房间没有名称，容量固定为 2。
    pub fn new_direct(id: RoomId, created_by: UserId, created_at: Timestamp) -> Self {
        Self {
            id,
            name: None,
            description: None,
            kind: RoomKind::Direct,
            trip_id: None,
            is_private: true,
            max_participants: DIRECT_ROOM_CAPACITY,
            created_by,
            created_at,
            updated_at: created_at,
        }
    }

    pub fn new_group(
        id: RoomId,
        name: Option<String>,
        description: Option<String>,
        is_private: bool,
        max_participants: Option<u32>,
        created_by: UserId,
        created_at: Timestamp,
    ) -> Result<Self, DomainError> {
        let name = name.map(Self::validate_name).transpose()?;
        let max_participants = max_participants.unwrap_or(GROUP_ROOM_CAPACITY);
        if max_participants < 1 {
            return Err(DomainError::invalid_argument(
                "max_participants",
                "must be at least 1",
            ));
        }
        Ok(Self {
            id,
            name,
            description,
            kind: RoomKind::Group,
            trip_id: None,
            is_private,
            max_participants,
            created_by,
            created_at,
            updated_at: created_at,
        })
    }

    pub fn new_trip(
        id: RoomId,
        trip_id: Option<TripId>,
        name: Option<String>,
        max_participants: Option<u32>,
        created_by: UserId,
        created_at: Timestamp,
    ) -> Result<Self, DomainError> {
        let name = name.map(Self::validate_name).transpose()?;
        Ok(Self {
            id,
            name,
            description: None,
            kind: RoomKind::Trip,
            trip_id,
            is_private: true,
            max_participants: max_participants.unwrap_or(TRIP_ROOM_CAPACITY),
            created_by,
            created_at,
            updated_at: created_at,
        })
    }

    pub fn is_direct(&self) -> bool {
        matches!(self.kind, RoomKind::Direct)
    }

    fn validate_name(name: String) -> Result<String, DomainError> {
        let name = name.trim().to_owned();
        if name.is_empty() {
            return Err(DomainError::invalid_argument("name", "cannot be empty"));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(DomainError::invalid_argument("name", "too long"));
        }
        Ok(name)
    }
}
