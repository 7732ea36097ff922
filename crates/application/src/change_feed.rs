//! 变更推送端口。
//!
//! 存储适配器在成功写入后发布行级事件，订阅分发器按主题消费。
//! 订阅的释放通过 guard 同步完成，不等待在途投递。

use async_trait::async_trait;
use domain::{Message, RoomId, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// 逻辑推送主题：某房间的消息流，或某用户的房间列表。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedTopic {
    RoomMessages(RoomId),
    RoomList(UserId),
}

/// 存储层发布的行级变更事件。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FeedEvent {
    /// 新消息落库。
    MessageInserted(Message),
    /// 某用户的参与者行发生插入或状态变化，房间列表需要刷新。
    ParticipantChanged { room_id: RoomId, user_id: UserId },
}

impl FeedEvent {
    pub fn matches(&self, topic: &FeedTopic) -> bool {
        match (self, topic) {
            (FeedEvent::MessageInserted(message), FeedTopic::RoomMessages(room_id)) => {
                message.room_id == *room_id
            }
            (FeedEvent::ParticipantChanged { user_id, .. }, FeedTopic::RoomList(user)) => {
                user_id == user
            }
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("change feed unavailable: {0}")]
    Unavailable(String),
}

impl FeedError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

/// 退订 guard。drop 即同步退订；具体清理动作由各实现注入。
pub struct FeedGuard {
    on_drop: Option<Box<dyn FnOnce() + Send>>,
}

impl FeedGuard {
    pub fn new(on_drop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            on_drop: Some(Box::new(on_drop)),
        }
    }

    pub fn noop() -> Self {
        Self { on_drop: None }
    }
}

impl Drop for FeedGuard {
    fn drop(&mut self) {
        if let Some(on_drop) = self.on_drop.take() {
            on_drop();
        }
    }
}

/// 一个已建立的底层订阅：事件接收端加退订 guard。
pub struct FeedSubscription {
    receiver: mpsc::UnboundedReceiver<FeedEvent>,
    guard: FeedGuard,
}

impl FeedSubscription {
    pub fn new(receiver: mpsc::UnboundedReceiver<FeedEvent>, guard: FeedGuard) -> Self {
        Self { receiver, guard }
    }

    pub async fn recv(&mut self) -> Option<FeedEvent> {
        self.receiver.recv().await
    }

    /// 拆成接收端与 guard，让持有者可以分开管理二者的生命周期。
    pub fn into_parts(self) -> (mpsc::UnboundedReceiver<FeedEvent>, FeedGuard) {
        (self.receiver, self.guard)
    }
}

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, topic: &FeedTopic) -> Result<FeedSubscription, FeedError>;
}

#[async_trait]
pub trait FeedPublisher: Send + Sync {
    async fn publish(&self, event: FeedEvent) -> Result<(), FeedError>;
}
