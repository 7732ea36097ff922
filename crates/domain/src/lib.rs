//! 聊天子系统核心领域模型
//!
//! 包含房间、参与者、消息、通知等核心实体，以及相关的业务规则。
//! 本层不依赖任何 I/O，仓储与推送接口由应用层定义。

pub mod chat_room;
pub mod errors;
pub mod message;
pub mod notification;
pub mod participant;
pub mod value_objects;

pub use chat_room::{ChatRoom, RoomKind, DIRECT_ROOM_CAPACITY, GROUP_ROOM_CAPACITY, TRIP_ROOM_CAPACITY};
pub use errors::{DomainError, RepositoryError, RepositoryResult};
pub use message::{Message, MessageKind, MESSAGE_TOMBSTONE};
pub use notification::Notification;
pub use participant::{NotificationPreferences, Participant, ParticipantRole};
pub use value_objects::{
    MessageContent, MessageId, NotificationId, RoomId, Timestamp, TripId, UserId,
};
