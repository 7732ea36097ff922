//! 聊天子系统宿主进程。
//!
//! 按配置装配持久化网关、变更推送与各服务，演示房间列表订阅，
//! 直到 ctrl-c 退出。服务实例显式构造、显式传递，没有进程级单例。

use std::{env, sync::Arc};

use application::{
    ChangeFeed, Clock, FeedPublisher, IdentityProvider, MessageRepository, MessageService,
    MessageServiceDependencies, NotificationRepository, ParticipantRepository, ProfileResolver,
    ReadStateService, ReadStateServiceDependencies, RoomRepository, RoomService,
    RoomServiceDependencies, SubscriptionDispatcher, SystemClock,
};
use config::ChatConfig;
use domain::UserId;
use infrastructure::{
    create_pg_pool, FallbackMessageRepository, FallbackNotificationRepository,
    FallbackParticipantRepository, FallbackRoomRepository, FixedIdentity, LocalChangeFeed,
    PgMessageRepository, PgNotificationRepository, PgParticipantRepository, PgProfileResolver,
    PgRoomRepository, RedisChangeFeed, RedisFeedPublisher, MIGRATOR,
};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = ChatConfig::from_env_with_defaults();
    tracing::info!(
        "连接数据库: {}",
        config.database.url.split('@').last().unwrap_or("unknown")
    );

    let pool = create_pg_pool(&config.database.url, config.database.max_connections).await?;
    MIGRATOR.run(&pool).await?;

    // 变更推送：配置了 Redis 用 Redis，否则退回进程内广播
    let (publisher, change_feed): (Arc<dyn FeedPublisher>, Arc<dyn ChangeFeed>) =
        match &config.feed.redis_url {
            Some(redis_url) => {
                tracing::info!("变更推送走 Redis");
                (
                    Arc::new(RedisFeedPublisher::connect(redis_url).await?),
                    Arc::new(RedisChangeFeed::new(redis_url)?),
                )
            }
            None => {
                tracing::info!("未配置 REDIS_URL，变更推送退回进程内广播");
                let local = LocalChangeFeed::new(config.feed.capacity);
                (Arc::new(local.clone()), Arc::new(local))
            }
        };

    // 持久化网关，按配置决定是否套降级装饰器
    let room_repo = PgRoomRepository::new(pool.clone(), publisher.clone());
    let participant_repo = PgParticipantRepository::new(pool.clone(), publisher.clone());
    let message_repo = PgMessageRepository::new(pool.clone(), publisher.clone());
    let notification_repo = PgNotificationRepository::new(pool.clone());

    let (rooms, participants, messages, notifications): (
        Arc<dyn RoomRepository>,
        Arc<dyn ParticipantRepository>,
        Arc<dyn MessageRepository>,
        Arc<dyn NotificationRepository>,
    ) = if config.fallback.enabled {
        (
            Arc::new(FallbackRoomRepository::new(Arc::new(room_repo))),
            Arc::new(FallbackParticipantRepository::new(Arc::new(participant_repo))),
            Arc::new(FallbackMessageRepository::new(Arc::new(message_repo))),
            Arc::new(FallbackNotificationRepository::new(Arc::new(
                notification_repo,
            ))),
        )
    } else {
        (
            Arc::new(room_repo),
            Arc::new(participant_repo),
            Arc::new(message_repo),
            Arc::new(notification_repo),
        )
    };

    // 身份来自宿主会话；演示进程从环境变量拿一个固定用户
    let current_user = env::var("CHAT_USER_ID")
        .ok()
        .and_then(|raw| raw.parse::<Uuid>().ok())
        .map(UserId::from);
    let identity = Arc::new(match current_user {
        Some(user) => FixedIdentity::new(user),
        None => {
            tracing::warn!("未设置 CHAT_USER_ID，以匿名身份启动（写操作会被拒绝）");
            FixedIdentity::anonymous()
        }
    });

    let profiles: Arc<dyn ProfileResolver> = Arc::new(PgProfileResolver::new(pool.clone()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // 应用层服务
    let message_service = Arc::new(MessageService::new(MessageServiceDependencies {
        identity: identity.clone(),
        profiles: profiles.clone(),
        rooms: rooms.clone(),
        participants: participants.clone(),
        messages: messages.clone(),
        notifications: notifications.clone(),
        clock: clock.clone(),
    }));
    let room_service = RoomService::new(RoomServiceDependencies {
        identity: identity.clone(),
        profiles: profiles.clone(),
        rooms: rooms.clone(),
        participants: participants.clone(),
        message_pipeline: message_service.clone(),
        clock: clock.clone(),
    });
    let _read_state = ReadStateService::new(ReadStateServiceDependencies {
        identity: identity.clone(),
        participants: participants.clone(),
        notifications: notifications.clone(),
        clock: clock.clone(),
    });

    let dispatcher = SubscriptionDispatcher::new(change_feed, profiles.clone());

    tracing::info!("聊天子系统就绪");

    if let Some(user) = identity.current_user() {
        let chat_rooms = room_service.get_user_chat_rooms().await?;
        tracing::info!(user = %user, rooms = chat_rooms.len(), "房间列表已加载");

        let mut subscription = dispatcher.subscribe_to_room_list(user).await;
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                event = subscription.recv() => match event {
                    Some(event) => tracing::info!(room_id = %event.room_id, "房间列表有更新"),
                    None => break,
                },
            }
        }
    } else {
        tokio::signal::ctrl_c().await?;
    }

    tracing::info!("退出");
    Ok(())
}
