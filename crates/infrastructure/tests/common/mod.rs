//! 测试装配：内存网关 + 进程内推送上的完整服务栈。

use std::sync::{Arc, Mutex};

use application::{
    Clock, MessageRepository, MessageService, MessageServiceDependencies, NotificationRepository,
    ParticipantRepository, ReadStateService, ReadStateServiceDependencies, RoomRepository,
    RoomService, RoomServiceDependencies, SubscriptionDispatcher,
};
use domain::{Timestamp, UserId};
use infrastructure::{
    FallbackMessageRepository, FallbackNotificationRepository, FallbackParticipantRepository,
    FallbackRoomRepository, FixedIdentity, MemoryStore, StaticProfileResolver,
};
use time::macros::datetime;
use uuid::Uuid;

/// 每次调用前进一秒的确定性时钟，保证消息时间戳互不相同。
pub struct StepClock {
    current: Mutex<Timestamp>,
}

impl StepClock {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(datetime!(2024-06-01 08:00 UTC)),
        }
    }
}

impl Clock for StepClock {
    fn now(&self) -> Timestamp {
        let mut current = self.current.lock().unwrap();
        *current += time::Duration::seconds(1);
        *current
    }
}

pub struct TestEnv {
    pub store: MemoryStore,
    pub identity: Arc<FixedIdentity>,
    pub profiles: StaticProfileResolver,
    pub rooms: RoomService,
    pub messages: Arc<MessageService>,
    pub read_state: ReadStateService,
    pub dispatcher: SubscriptionDispatcher,
}

impl TestEnv {
    /// 直连内存网关的服务栈。
    pub fn new() -> Self {
        let store = MemoryStore::new();
        Self::wire(
            store.clone(),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store),
        )
    }

    /// 读路径套上降级装饰器的服务栈。
    pub fn with_fallback() -> Self {
        let store = MemoryStore::new();
        Self::wire(
            store.clone(),
            Arc::new(FallbackRoomRepository::new(Arc::new(store.clone()))),
            Arc::new(FallbackParticipantRepository::new(Arc::new(store.clone()))),
            Arc::new(FallbackMessageRepository::new(Arc::new(store.clone()))),
            Arc::new(FallbackNotificationRepository::new(Arc::new(store))),
        )
    }

    fn wire(
        store: MemoryStore,
        rooms: Arc<dyn RoomRepository>,
        participants: Arc<dyn ParticipantRepository>,
        messages: Arc<dyn MessageRepository>,
        notifications: Arc<dyn NotificationRepository>,
    ) -> Self {
        let identity = Arc::new(FixedIdentity::anonymous());
        let profiles = StaticProfileResolver::new();
        let clock: Arc<dyn Clock> = Arc::new(StepClock::new());

        let message_service = Arc::new(MessageService::new(MessageServiceDependencies {
            identity: identity.clone(),
            profiles: Arc::new(profiles.clone()),
            rooms: rooms.clone(),
            participants: participants.clone(),
            messages: messages.clone(),
            notifications: notifications.clone(),
            clock: clock.clone(),
        }));
        let room_service = RoomService::new(RoomServiceDependencies {
            identity: identity.clone(),
            profiles: Arc::new(profiles.clone()),
            rooms: rooms.clone(),
            participants: participants.clone(),
            message_pipeline: message_service.clone(),
            clock: clock.clone(),
        });
        let read_state = ReadStateService::new(ReadStateServiceDependencies {
            identity: identity.clone(),
            participants,
            notifications,
            clock,
        });
        let dispatcher = SubscriptionDispatcher::new(
            Arc::new(store.feed()),
            Arc::new(profiles.clone()),
        );

        Self {
            store,
            identity,
            profiles,
            rooms: room_service,
            messages: message_service,
            read_state,
            dispatcher,
        }
    }

    /// 切换当前会话身份。
    pub fn login(&self, user: UserId) {
        self.identity.set_user(Some(user));
    }
}

pub fn user() -> UserId {
    UserId::from(Uuid::new_v4())
}
