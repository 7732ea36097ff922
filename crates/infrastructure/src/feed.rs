//! Redis 变更推送。
//!
//! 每个主题对应一个 pub/sub 频道；存储适配器在成功写入后发布
//! 序列化的行级事件，订阅端反序列化后转发。无法解析的载荷跳过。

use application::change_feed::{
    ChangeFeed, FeedError, FeedEvent, FeedGuard, FeedPublisher, FeedSubscription, FeedTopic,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::sync::mpsc;
use tracing::{debug, info};

fn channel_for_topic(topic: &FeedTopic) -> String {
    match topic {
        FeedTopic::RoomMessages(room_id) => format!("chat:room:{room_id}:messages"),
        FeedTopic::RoomList(user_id) => format!("chat:user:{user_id}:rooms"),
    }
}

fn channel_for_event(event: &FeedEvent) -> String {
    match event {
        FeedEvent::MessageInserted(message) => {
            channel_for_topic(&FeedTopic::RoomMessages(message.room_id))
        }
        FeedEvent::ParticipantChanged { user_id, .. } => {
            channel_for_topic(&FeedTopic::RoomList(*user_id))
        }
    }
}

fn map_redis_err(err: redis::RedisError) -> FeedError {
    FeedError::unavailable(err.to_string())
}

/// 订阅端：每次 subscribe 打开一条独立的 pub/sub 连接，
/// guard 被 drop 时中止转发任务并随之关闭连接。
pub struct RedisChangeFeed {
    client: Client,
}

impl RedisChangeFeed {
    pub fn new(url: &str) -> Result<Self, FeedError> {
        let client = Client::open(url).map_err(map_redis_err)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ChangeFeed for RedisChangeFeed {
    async fn subscribe(&self, topic: &FeedTopic) -> Result<FeedSubscription, FeedError> {
        let channel = channel_for_topic(topic);
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(map_redis_err)?;
        pubsub.subscribe(&channel).await.map_err(map_redis_err)?;
        info!(%channel, "redis change feed subscribed");

        let (tx, rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(message) = stream.next().await {
                let payload: String = match message.get_payload() {
                    Ok(payload) => payload,
                    Err(error) => {
                        debug!(%error, "unreadable change feed payload, skipped");
                        continue;
                    }
                };
                match serde_json::from_str::<FeedEvent>(&payload) {
                    Ok(event) => {
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        debug!(%error, "undecodable change feed event, skipped");
                    }
                }
            }
        });

        let guard = FeedGuard::new(move || pump.abort());
        Ok(FeedSubscription::new(rx, guard))
    }
}

/// 发布端：连接管理器自动重连，所有存储适配器共享一个实例。
#[derive(Clone)]
pub struct RedisFeedPublisher {
    connection: ConnectionManager,
}

impl RedisFeedPublisher {
    pub async fn connect(url: &str) -> Result<Self, FeedError> {
        let client = Client::open(url).map_err(map_redis_err)?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(map_redis_err)?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl FeedPublisher for RedisFeedPublisher {
    async fn publish(&self, event: FeedEvent) -> Result<(), FeedError> {
        let channel = channel_for_event(&event);
        let payload = serde_json::to_string(&event)
            .map_err(|err| FeedError::unavailable(err.to_string()))?;
        let mut connection = self.connection.clone();
        connection
            .publish::<_, _, ()>(&channel, payload)
            .await
            .map_err(map_redis_err)?;
        Ok(())
    }
}
