//! 持久化网关接口。
//!
//! 存储模式只被 infrastructure 层的实现知晓；这里的方法签名即
//! 本子系统对房间、参与者、消息、通知四个集合的全部访问方式。

use std::collections::HashMap;

use async_trait::async_trait;
use domain::{
    ChatRoom, Message, MessageId, Notification, Participant, RepositoryResult, RoomId, Timestamp,
    UserId,
};

#[async_trait]
pub trait RoomRepository: Send + Sync {
    /// 原子创建房间及其房主参与者行；任一失败则两者都不落地。
    async fn create_with_owner(
        &self,
        room: ChatRoom,
        owner: Participant,
    ) -> RepositoryResult<ChatRoom>;

    async fn find_by_id(&self, id: RoomId) -> RepositoryResult<Option<ChatRoom>>;

    /// 该用户作为活跃参与者的全部房间。
    async fn list_for_user(&self, user_id: UserId) -> RepositoryResult<Vec<ChatRoom>>;

    /// 该用户参与的单聊房间，get_or_create 的扫描基础。
    async fn list_direct_for_user(&self, user_id: UserId) -> RepositoryResult<Vec<ChatRoom>>;

    /// 删除房间并级联参与者、消息、通知。
    async fn delete(&self, id: RoomId) -> RepositoryResult<()>;
}

#[async_trait]
pub trait ParticipantRepository: Send + Sync {
    /// 写入参与者行；(room_id, user_id) 已存在时整行覆盖，
    /// 用于重新加入之前离开过的房间。
    async fn upsert(&self, participant: Participant) -> RepositoryResult<Participant>;

    async fn find(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> RepositoryResult<Option<Participant>>;

    async fn list_active(&self, room_id: RoomId) -> RepositoryResult<Vec<Participant>>;

    async fn count_active(&self, room_id: RoomId) -> RepositoryResult<u32>;

    /// 置 is_active = false，行保留。
    async fn deactivate(&self, room_id: RoomId, user_id: UserId) -> RepositoryResult<()>;

    async fn set_last_read(
        &self,
        room_id: RoomId,
        user_id: UserId,
        at: Timestamp,
    ) -> RepositoryResult<()>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn insert(&self, message: Message) -> RepositoryResult<Message>;

    async fn find_by_id(&self, id: MessageId) -> RepositoryResult<Option<Message>>;

    /// 批量查找，回复预览用。缺失的 id 静默跳过。
    async fn find_many(&self, ids: &[MessageId]) -> RepositoryResult<Vec<Message>>;

    async fn update(&self, message: Message) -> RepositoryResult<Message>;

    /// 按 (created_at, 存储序列) 降序返回一页；`before` 之前的旧历史。
    /// 同时间戳的稳定顺序由存储的单调序列保证。
    async fn list_page(
        &self,
        room_id: RoomId,
        limit: u32,
        before: Option<Timestamp>,
    ) -> RepositoryResult<Vec<Message>>;
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn insert_many(&self, notifications: Vec<Notification>) -> RepositoryResult<()>;

    /// 该用户在该房间的所有未读行置为已读，返回实际翻转的行数。
    async fn mark_room_read(
        &self,
        user_id: UserId,
        room_id: RoomId,
        at: Timestamp,
    ) -> RepositoryResult<u64>;

    /// 每个房间的未读行数；没有未读的房间不出现在结果里。
    async fn count_unread(&self, user_id: UserId) -> RepositoryResult<HashMap<RoomId, u64>>;
}
