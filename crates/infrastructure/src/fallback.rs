//! 降级层。
//!
//! 包装真实的持久化网关：读路径出错时记一条警告并返回固定的
//! 合成数据集，UI 拿到的永远是可渲染的结果；写路径的错误原样
//! 向上传播，假装写入成功只会破坏用户预期。是否启用由组合根
//! 按配置决定，生产构建可以整层关掉。
//!
//! 只有直接服务读操作（房间列表、消息分页、参与者列表、未读计数、
//! 回复预览）的方法参与降级；服务写路径的内部查找原样透传，
//! 这样发送、编辑、删除在后端不可用时仍然以错误收场。

use std::collections::HashMap;
use std::sync::Arc;

use application::repository::{
    MessageRepository, NotificationRepository, ParticipantRepository, RoomRepository,
};
use async_trait::async_trait;
use domain::{
    ChatRoom, Message, MessageContent, MessageId, MessageKind, Notification, Participant,
    RepositoryResult, RoomId, RoomKind, Timestamp, UserId,
};
use once_cell::sync::Lazy;
use time::macros::datetime;
use tracing::warn;
use uuid::Uuid;

/// 合成数据集版本，内容变化时递增。
pub const FALLBACK_DATASET_VERSION: u32 = 1;

const FALLBACK_SENDER: u128 = 0xfa11_bacc_0000_0000_0000_0000_0000_0001;
const FALLBACK_ROOM_TRIP: u128 = 0xfa11_bacc_0000_0000_0000_0000_0000_0010;
const FALLBACK_ROOM_GENERAL: u128 = 0xfa11_bacc_0000_0000_0000_0000_0000_0011;

fn fallback_time() -> Timestamp {
    datetime!(2024-06-01 09:00 UTC)
}

static FALLBACK_ROOMS: Lazy<Vec<ChatRoom>> = Lazy::new(|| {
    let at = fallback_time();
    let creator = UserId::from(Uuid::from_u128(FALLBACK_SENDER));
    vec![
        ChatRoom {
            id: RoomId::from(Uuid::from_u128(FALLBACK_ROOM_TRIP)),
            name: Some("Trip planning".to_owned()),
            description: Some("Cached conversation".to_owned()),
            kind: RoomKind::Trip,
            trip_id: None,
            is_private: true,
            max_participants: 100,
            created_by: creator,
            created_at: at,
            updated_at: at,
        },
        ChatRoom {
            id: RoomId::from(Uuid::from_u128(FALLBACK_ROOM_GENERAL)),
            name: Some("Travel buddies".to_owned()),
            description: Some("Cached conversation".to_owned()),
            kind: RoomKind::Group,
            trip_id: None,
            is_private: false,
            max_participants: 50,
            created_by: creator,
            created_at: at,
            updated_at: at,
        },
    ]
});

/// 固定的合成房间列表。
pub fn fallback_rooms() -> Vec<ChatRoom> {
    FALLBACK_ROOMS.clone()
}

/// 固定的合成消息页，降序排列，房间 id 换成调用方查询的那个。
pub fn fallback_messages(room_id: RoomId) -> Vec<Message> {
    let sender = UserId::from(Uuid::from_u128(FALLBACK_SENDER));
    let base = fallback_time();
    let texts = [
        "Chat history is temporarily unavailable.",
        "You are seeing cached content while we reconnect.",
    ];
    texts
        .iter()
        .enumerate()
        .map(|(index, text)| {
            let at = base - time::Duration::minutes(index as i64);
            Message::new(
                MessageId::from(Uuid::from_u128(FALLBACK_SENDER + 0x100 + index as u128)),
                room_id,
                sender,
                MessageContent::new(*text).expect("static fallback content is valid"),
                MessageKind::System,
                None,
                None,
                at,
            )
        })
        .collect()
}

pub struct FallbackRoomRepository {
    inner: Arc<dyn RoomRepository>,
}

impl FallbackRoomRepository {
    pub fn new(inner: Arc<dyn RoomRepository>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl RoomRepository for FallbackRoomRepository {
    async fn create_with_owner(
        &self,
        room: ChatRoom,
        owner: Participant,
    ) -> RepositoryResult<ChatRoom> {
        self.inner.create_with_owner(room, owner).await
    }

    async fn find_by_id(&self, id: RoomId) -> RepositoryResult<Option<ChatRoom>> {
        self.inner.find_by_id(id).await
    }

    async fn list_for_user(&self, user_id: UserId) -> RepositoryResult<Vec<ChatRoom>> {
        match self.inner.list_for_user(user_id).await {
            Ok(rooms) => Ok(rooms),
            Err(error) => {
                warn!(operation = "list_for_user", %error, version = FALLBACK_DATASET_VERSION, "room list degraded to fallback dataset");
                Ok(fallback_rooms())
            }
        }
    }

    async fn list_direct_for_user(&self, user_id: UserId) -> RepositoryResult<Vec<ChatRoom>> {
        // get_or_create 的扫描属于写路径，错误照常上浮
        self.inner.list_direct_for_user(user_id).await
    }

    async fn delete(&self, id: RoomId) -> RepositoryResult<()> {
        self.inner.delete(id).await
    }
}

pub struct FallbackParticipantRepository {
    inner: Arc<dyn ParticipantRepository>,
}

impl FallbackParticipantRepository {
    pub fn new(inner: Arc<dyn ParticipantRepository>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ParticipantRepository for FallbackParticipantRepository {
    async fn upsert(&self, participant: Participant) -> RepositoryResult<Participant> {
        self.inner.upsert(participant).await
    }

    async fn find(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> RepositoryResult<Option<Participant>> {
        self.inner.find(room_id, user_id).await
    }

    async fn list_active(&self, room_id: RoomId) -> RepositoryResult<Vec<Participant>> {
        match self.inner.list_active(room_id).await {
            Ok(participants) => Ok(participants),
            Err(error) => {
                warn!(operation = "list_active", %room_id, %error, "participant list degraded to empty");
                Ok(Vec::new())
            }
        }
    }

    async fn count_active(&self, room_id: RoomId) -> RepositoryResult<u32> {
        self.inner.count_active(room_id).await
    }

    async fn deactivate(&self, room_id: RoomId, user_id: UserId) -> RepositoryResult<()> {
        self.inner.deactivate(room_id, user_id).await
    }

    async fn set_last_read(
        &self,
        room_id: RoomId,
        user_id: UserId,
        at: Timestamp,
    ) -> RepositoryResult<()> {
        self.inner.set_last_read(room_id, user_id, at).await
    }
}

pub struct FallbackMessageRepository {
    inner: Arc<dyn MessageRepository>,
}

impl FallbackMessageRepository {
    pub fn new(inner: Arc<dyn MessageRepository>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl MessageRepository for FallbackMessageRepository {
    async fn insert(&self, message: Message) -> RepositoryResult<Message> {
        self.inner.insert(message).await
    }

    async fn find_by_id(&self, id: MessageId) -> RepositoryResult<Option<Message>> {
        // 编辑与删除的前置查找，写路径语义
        self.inner.find_by_id(id).await
    }

    async fn find_many(&self, ids: &[MessageId]) -> RepositoryResult<Vec<Message>> {
        match self.inner.find_many(ids).await {
            Ok(messages) => Ok(messages),
            Err(error) => {
                warn!(operation = "find_many", %error, "reply previews degraded to none");
                Ok(Vec::new())
            }
        }
    }

    async fn update(&self, message: Message) -> RepositoryResult<Message> {
        self.inner.update(message).await
    }

    async fn list_page(
        &self,
        room_id: RoomId,
        limit: u32,
        before: Option<Timestamp>,
    ) -> RepositoryResult<Vec<Message>> {
        match self.inner.list_page(room_id, limit, before).await {
            Ok(page) => Ok(page),
            Err(error) => {
                warn!(operation = "list_page", %room_id, %error, version = FALLBACK_DATASET_VERSION, "message page degraded to fallback dataset");
                let mut page = fallback_messages(room_id);
                page.truncate(limit as usize);
                Ok(page)
            }
        }
    }
}

pub struct FallbackNotificationRepository {
    inner: Arc<dyn NotificationRepository>,
}

impl FallbackNotificationRepository {
    pub fn new(inner: Arc<dyn NotificationRepository>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl NotificationRepository for FallbackNotificationRepository {
    async fn insert_many(&self, notifications: Vec<Notification>) -> RepositoryResult<()> {
        self.inner.insert_many(notifications).await
    }

    async fn mark_room_read(
        &self,
        user_id: UserId,
        room_id: RoomId,
        at: Timestamp,
    ) -> RepositoryResult<u64> {
        self.inner.mark_room_read(user_id, room_id, at).await
    }

    async fn count_unread(&self, user_id: UserId) -> RepositoryResult<HashMap<RoomId, u64>> {
        match self.inner.count_unread(user_id).await {
            Ok(counts) => Ok(counts),
            Err(error) => {
                warn!(operation = "count_unread", %error, "unread counts degraded to empty");
                Ok(HashMap::new())
            }
        }
    }
}
