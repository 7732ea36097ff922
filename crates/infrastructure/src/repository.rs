//! 持久化网关的 PostgreSQL 实现。
//!
//! 行结构体负责与表结构一一对应，TryFrom 把行还原成领域对象；
//! 成功写入后通过 FeedPublisher 发布行级变更事件，发布失败只记
//! 警告，不影响已经落库的写入。

use std::sync::Arc;

use application::change_feed::{FeedEvent, FeedPublisher};
use application::repository::{
    MessageRepository, NotificationRepository, ParticipantRepository, RoomRepository,
};
use async_trait::async_trait;
use domain::{
    ChatRoom, Message, MessageContent, MessageId, Notification, NotificationPreferences,
    Participant, ParticipantRole, RepositoryError, RepositoryResult, RoomId, RoomKind, TripId,
    UserId,
};
use domain::{MessageKind, Timestamp};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

pub async fn create_pg_pool(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
}

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    RepositoryError::storage(err.to_string())
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::invalid_data(message)
}

async fn publish_best_effort(feed: &Arc<dyn FeedPublisher>, event: FeedEvent) {
    if let Err(error) = feed.publish(event).await {
        warn!(%error, "change feed publish failed after durable write");
    }
}

#[derive(Debug, FromRow)]
struct RoomRecord {
    id: Uuid,
    name: Option<String>,
    description: Option<String>,
    kind: RoomKind,
    trip_id: Option<Uuid>,
    is_private: bool,
    max_participants: i32,
    created_by: Uuid,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<RoomRecord> for ChatRoom {
    type Error = RepositoryError;

    fn try_from(value: RoomRecord) -> Result<Self, Self::Error> {
        let max_participants = u32::try_from(value.max_participants)
            .map_err(|_| invalid_data("negative max_participants"))?;
        Ok(ChatRoom {
            id: RoomId::from(value.id),
            name: value.name,
            description: value.description,
            kind: value.kind,
            trip_id: value.trip_id.map(TripId::from),
            is_private: value.is_private,
            max_participants,
            created_by: UserId::from(value.created_by),
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ParticipantRecord {
    room_id: Uuid,
    user_id: Uuid,
    role: ParticipantRole,
    can_send_messages: bool,
    can_add_participants: bool,
    joined_at: OffsetDateTime,
    last_read_at: Option<OffsetDateTime>,
    is_active: bool,
    muted: bool,
    sound: bool,
}

impl From<ParticipantRecord> for Participant {
    fn from(value: ParticipantRecord) -> Self {
        Participant {
            room_id: RoomId::from(value.room_id),
            user_id: UserId::from(value.user_id),
            role: value.role,
            can_send_messages: value.can_send_messages,
            can_add_participants: value.can_add_participants,
            joined_at: value.joined_at,
            last_read_at: value.last_read_at,
            is_active: value.is_active,
            preferences: NotificationPreferences {
                muted: value.muted,
                sound: value.sound,
            },
        }
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: Uuid,
    room_id: Uuid,
    sender_id: Uuid,
    content: String,
    kind: MessageKind,
    metadata: serde_json::Value,
    is_edited: bool,
    edited_at: Option<OffsetDateTime>,
    is_deleted: bool,
    deleted_at: Option<OffsetDateTime>,
    reply_to: Option<Uuid>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let content =
            MessageContent::new(value.content).map_err(|err| invalid_data(err.to_string()))?;
        Ok(Message {
            id: MessageId::from(value.id),
            room_id: RoomId::from(value.room_id),
            sender_id: UserId::from(value.sender_id),
            content,
            kind: value.kind,
            metadata: value.metadata,
            is_edited: value.is_edited,
            edited_at: value.edited_at,
            is_deleted: value.is_deleted,
            deleted_at: value.deleted_at,
            reply_to: value.reply_to.map(MessageId::from),
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

const ROOM_COLUMNS: &str = "id, name, description, kind, trip_id, is_private, max_participants, created_by, created_at, updated_at";
const PARTICIPANT_COLUMNS: &str = "room_id, user_id, role, can_send_messages, can_add_participants, joined_at, last_read_at, is_active, muted, sound";
const MESSAGE_COLUMNS: &str = "id, room_id, sender_id, content, kind, metadata, is_edited, edited_at, is_deleted, deleted_at, reply_to, created_at, updated_at";

#[derive(Clone)]
pub struct PgRoomRepository {
    pool: PgPool,
    feed: Arc<dyn FeedPublisher>,
}

impl PgRoomRepository {
    pub fn new(pool: PgPool, feed: Arc<dyn FeedPublisher>) -> Self {
        Self { pool, feed }
    }
}

#[async_trait]
impl RoomRepository for PgRoomRepository {
    async fn create_with_owner(
        &self,
        room: ChatRoom,
        owner: Participant,
    ) -> RepositoryResult<ChatRoom> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let record = sqlx::query_as::<_, RoomRecord>(&format!(
            r#"
            INSERT INTO chat_rooms ({ROOM_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {ROOM_COLUMNS}
            "#,
        ))
        .bind(Uuid::from(room.id))
        .bind(&room.name)
        .bind(&room.description)
        .bind(room.kind)
        .bind(room.trip_id.map(Uuid::from))
        .bind(room.is_private)
        .bind(room.max_participants as i32)
        .bind(Uuid::from(room.created_by))
        .bind(room.created_at)
        .bind(room.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        sqlx::query(&format!(
            r#"
            INSERT INTO chat_participants ({PARTICIPANT_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        ))
        .bind(Uuid::from(owner.room_id))
        .bind(Uuid::from(owner.user_id))
        .bind(owner.role)
        .bind(owner.can_send_messages)
        .bind(owner.can_add_participants)
        .bind(owner.joined_at)
        .bind(owner.last_read_at)
        .bind(owner.is_active)
        .bind(owner.preferences.muted)
        .bind(owner.preferences.sound)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;

        publish_best_effort(
            &self.feed,
            FeedEvent::ParticipantChanged {
                room_id: owner.room_id,
                user_id: owner.user_id,
            },
        )
        .await;

        ChatRoom::try_from(record)
    }

    async fn find_by_id(&self, id: RoomId) -> RepositoryResult<Option<ChatRoom>> {
        let record = sqlx::query_as::<_, RoomRecord>(&format!(
            r#"SELECT {ROOM_COLUMNS} FROM chat_rooms WHERE id = $1"#,
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(ChatRoom::try_from).transpose()
    }

    async fn list_for_user(&self, user_id: UserId) -> RepositoryResult<Vec<ChatRoom>> {
        let records = sqlx::query_as::<_, RoomRecord>(&format!(
            r#"
            SELECT {ROOM_COLUMNS}
            FROM chat_rooms r
            JOIN chat_participants p ON p.room_id = r.id
            WHERE p.user_id = $1 AND p.is_active = TRUE
            ORDER BY r.updated_at DESC
            "#,
        ))
        .bind(Uuid::from(user_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(ChatRoom::try_from).collect()
    }

    async fn list_direct_for_user(&self, user_id: UserId) -> RepositoryResult<Vec<ChatRoom>> {
        let records = sqlx::query_as::<_, RoomRecord>(&format!(
            r#"
            SELECT {ROOM_COLUMNS}
            FROM chat_rooms r
            JOIN chat_participants p ON p.room_id = r.id
            WHERE p.user_id = $1 AND p.is_active = TRUE AND r.kind = 'direct'
            ORDER BY r.updated_at DESC
            "#,
        ))
        .bind(Uuid::from(user_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(ChatRoom::try_from).collect()
    }

    async fn delete(&self, id: RoomId) -> RepositoryResult<()> {
        let affected: Vec<Uuid> = sqlx::query_scalar(
            r#"SELECT user_id FROM chat_participants WHERE room_id = $1 AND is_active = TRUE"#,
        )
        .bind(Uuid::from(id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        // 参与者、消息、通知由外键级联一并删除
        sqlx::query("DELETE FROM chat_rooms WHERE id = $1")
            .bind(Uuid::from(id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        for user_id in affected {
            publish_best_effort(
                &self.feed,
                FeedEvent::ParticipantChanged {
                    room_id: id,
                    user_id: UserId::from(user_id),
                },
            )
            .await;
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgParticipantRepository {
    pool: PgPool,
    feed: Arc<dyn FeedPublisher>,
}

impl PgParticipantRepository {
    pub fn new(pool: PgPool, feed: Arc<dyn FeedPublisher>) -> Self {
        Self { pool, feed }
    }
}

#[async_trait]
impl ParticipantRepository for PgParticipantRepository {
    async fn upsert(&self, participant: Participant) -> RepositoryResult<Participant> {
        let record = sqlx::query_as::<_, ParticipantRecord>(&format!(
            r#"
            INSERT INTO chat_participants ({PARTICIPANT_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (room_id, user_id) DO UPDATE SET
                role = EXCLUDED.role,
                can_send_messages = EXCLUDED.can_send_messages,
                can_add_participants = EXCLUDED.can_add_participants,
                joined_at = EXCLUDED.joined_at,
                last_read_at = EXCLUDED.last_read_at,
                is_active = EXCLUDED.is_active,
                muted = EXCLUDED.muted,
                sound = EXCLUDED.sound
            RETURNING {PARTICIPANT_COLUMNS}
            "#,
        ))
        .bind(Uuid::from(participant.room_id))
        .bind(Uuid::from(participant.user_id))
        .bind(participant.role)
        .bind(participant.can_send_messages)
        .bind(participant.can_add_participants)
        .bind(participant.joined_at)
        .bind(participant.last_read_at)
        .bind(participant.is_active)
        .bind(participant.preferences.muted)
        .bind(participant.preferences.sound)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let stored = Participant::from(record);
        publish_best_effort(
            &self.feed,
            FeedEvent::ParticipantChanged {
                room_id: stored.room_id,
                user_id: stored.user_id,
            },
        )
        .await;
        Ok(stored)
    }

    async fn find(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> RepositoryResult<Option<Participant>> {
        let record = sqlx::query_as::<_, ParticipantRecord>(&format!(
            r#"SELECT {PARTICIPANT_COLUMNS} FROM chat_participants WHERE room_id = $1 AND user_id = $2"#,
        ))
        .bind(Uuid::from(room_id))
        .bind(Uuid::from(user_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(Participant::from))
    }

    async fn list_active(&self, room_id: RoomId) -> RepositoryResult<Vec<Participant>> {
        let records = sqlx::query_as::<_, ParticipantRecord>(&format!(
            r#"
            SELECT {PARTICIPANT_COLUMNS} FROM chat_participants
            WHERE room_id = $1 AND is_active = TRUE
            ORDER BY joined_at
            "#,
        ))
        .bind(Uuid::from(room_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(Participant::from).collect())
    }

    async fn count_active(&self, room_id: RoomId) -> RepositoryResult<u32> {
        let count: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM chat_participants WHERE room_id = $1 AND is_active = TRUE"#,
        )
        .bind(Uuid::from(room_id))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(count as u32)
    }

    async fn deactivate(&self, room_id: RoomId, user_id: UserId) -> RepositoryResult<()> {
        sqlx::query(
            r#"UPDATE chat_participants SET is_active = FALSE WHERE room_id = $1 AND user_id = $2"#,
        )
        .bind(Uuid::from(room_id))
        .bind(Uuid::from(user_id))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        publish_best_effort(
            &self.feed,
            FeedEvent::ParticipantChanged { room_id, user_id },
        )
        .await;
        Ok(())
    }

    async fn set_last_read(
        &self,
        room_id: RoomId,
        user_id: UserId,
        at: Timestamp,
    ) -> RepositoryResult<()> {
        sqlx::query(
            r#"UPDATE chat_participants SET last_read_at = $3 WHERE room_id = $1 AND user_id = $2"#,
        )
        .bind(Uuid::from(room_id))
        .bind(Uuid::from(user_id))
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
    feed: Arc<dyn FeedPublisher>,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool, feed: Arc<dyn FeedPublisher>) -> Self {
        Self { pool, feed }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn insert(&self, message: Message) -> RepositoryResult<Message> {
        // seq 列由 BIGSERIAL 分配，是同时间戳消息的单调决胜序列
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            INSERT INTO chat_messages ({MESSAGE_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {MESSAGE_COLUMNS}
            "#,
        ))
        .bind(Uuid::from(message.id))
        .bind(Uuid::from(message.room_id))
        .bind(Uuid::from(message.sender_id))
        .bind(message.content.as_str())
        .bind(message.kind)
        .bind(&message.metadata)
        .bind(message.is_edited)
        .bind(message.edited_at)
        .bind(message.is_deleted)
        .bind(message.deleted_at)
        .bind(message.reply_to.map(Uuid::from))
        .bind(message.created_at)
        .bind(message.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let stored = Message::try_from(record)?;
        publish_best_effort(&self.feed, FeedEvent::MessageInserted(stored.clone())).await;
        Ok(stored)
    }

    async fn find_by_id(&self, id: MessageId) -> RepositoryResult<Option<Message>> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"SELECT {MESSAGE_COLUMNS} FROM chat_messages WHERE id = $1"#,
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Message::try_from).transpose()
    }

    async fn find_many(&self, ids: &[MessageId]) -> RepositoryResult<Vec<Message>> {
        let ids: Vec<Uuid> = ids.iter().copied().map(Uuid::from).collect();
        let records = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"SELECT {MESSAGE_COLUMNS} FROM chat_messages WHERE id = ANY($1)"#,
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(Message::try_from).collect()
    }

    async fn update(&self, message: Message) -> RepositoryResult<Message> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            UPDATE chat_messages
            SET content = $2, is_edited = $3, edited_at = $4,
                is_deleted = $5, deleted_at = $6, updated_at = $7
            WHERE id = $1
            RETURNING {MESSAGE_COLUMNS}
            "#,
        ))
        .bind(Uuid::from(message.id))
        .bind(message.content.as_str())
        .bind(message.is_edited)
        .bind(message.edited_at)
        .bind(message.is_deleted)
        .bind(message.deleted_at)
        .bind(message.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Message::try_from(record)
    }

    async fn list_page(
        &self,
        room_id: RoomId,
        limit: u32,
        before: Option<Timestamp>,
    ) -> RepositoryResult<Vec<Message>> {
        let records = match before {
            Some(cutoff) => {
                sqlx::query_as::<_, MessageRecord>(&format!(
                    r#"
                    SELECT {MESSAGE_COLUMNS} FROM chat_messages
                    WHERE room_id = $1 AND created_at < $2
                    ORDER BY created_at DESC, seq DESC
                    LIMIT $3
                    "#,
                ))
                .bind(Uuid::from(room_id))
                .bind(cutoff)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, MessageRecord>(&format!(
                    r#"
                    SELECT {MESSAGE_COLUMNS} FROM chat_messages
                    WHERE room_id = $1
                    ORDER BY created_at DESC, seq DESC
                    LIMIT $2
                    "#,
                ))
                .bind(Uuid::from(room_id))
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(map_sqlx_err)?;

        records.into_iter().map(Message::try_from).collect()
    }
}

#[derive(Clone)]
pub struct PgNotificationRepository {
    pool: PgPool,
}

impl PgNotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationRepository for PgNotificationRepository {
    async fn insert_many(&self, notifications: Vec<Notification>) -> RepositoryResult<()> {
        if notifications.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        for notification in notifications {
            sqlx::query(
                r#"
                INSERT INTO chat_notifications
                    (id, user_id, room_id, message_id, is_read, read_at, push_sent, email_sent, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(Uuid::from(notification.id))
            .bind(Uuid::from(notification.user_id))
            .bind(Uuid::from(notification.room_id))
            .bind(Uuid::from(notification.message_id))
            .bind(notification.is_read)
            .bind(notification.read_at)
            .bind(notification.push_sent)
            .bind(notification.email_sent)
            .bind(notification.created_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        }
        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn mark_room_read(
        &self,
        user_id: UserId,
        room_id: RoomId,
        at: Timestamp,
    ) -> RepositoryResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE chat_notifications
            SET is_read = TRUE, read_at = $3
            WHERE user_id = $1 AND room_id = $2 AND is_read = FALSE
            "#,
        )
        .bind(Uuid::from(user_id))
        .bind(Uuid::from(room_id))
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(result.rows_affected())
    }

    async fn count_unread(
        &self,
        user_id: UserId,
    ) -> RepositoryResult<std::collections::HashMap<RoomId, u64>> {
        let rows: Vec<(Uuid, i64)> = sqlx::query_as(
            r#"
            SELECT room_id, COUNT(*) FROM chat_notifications
            WHERE user_id = $1 AND is_read = FALSE
            GROUP BY room_id
            "#,
        )
        .bind(Uuid::from(user_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(rows
            .into_iter()
            .map(|(room_id, count)| (RoomId::from(room_id), count as u64))
            .collect())
    }
}
