//! 应用层实现。
//!
//! 这里提供围绕领域模型的用例服务：房间与参与者管理、消息管道、
//! 已读状态追踪、订阅分发，以及它们依赖的外部端口
//! （持久化网关、变更推送、身份与资料解析）。

pub mod change_feed;
pub mod clock;
pub mod dispatcher;
pub mod dto;
pub mod error;
pub mod identity;
pub mod repository;
pub mod services;

pub use change_feed::{
    ChangeFeed, FeedError, FeedEvent, FeedGuard, FeedPublisher, FeedSubscription, FeedTopic,
};
pub use clock::{Clock, SystemClock};
pub use dispatcher::{
    MessageEvent, MessageSubscription, RoomListEvent, RoomListSubscription, SubscriptionDispatcher,
};
pub use dto::{ChatMessage, ReplyPreview, RoomParticipant};
pub use error::ChatError;
pub use identity::{IdentityProvider, ProfileError, ProfileResolver, UserProfile};
pub use repository::{
    MessageRepository, NotificationRepository, ParticipantRepository, RoomRepository,
};
pub use services::{
    CreateRoomRequest, MessageService, MessageServiceDependencies, ReadStateService,
    ReadStateServiceDependencies, RoomService, RoomServiceDependencies, SendMessageRequest,
};
