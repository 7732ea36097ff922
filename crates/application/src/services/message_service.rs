//! 消息管道。
//!
//! 发送、分页、编辑、删除。写入成功后的实时推送由存储适配器发布、
//! 订阅分发器消费，发送者自己的界面更新也走同一条订阅通道。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use domain::{
    Message, MessageContent, MessageId, MessageKind, Notification, NotificationId, RoomId, UserId,
};
use tracing::warn;
use uuid::Uuid;

use crate::clock::Clock;
use crate::dto::{ChatMessage, ReplyPreview};
use crate::error::ChatError;
use crate::identity::{IdentityProvider, ProfileResolver, UserProfile};
use crate::repository::{
    MessageRepository, NotificationRepository, ParticipantRepository, RoomRepository,
};

#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub room_id: RoomId,
    pub content: String,
    pub kind: MessageKind,
    pub metadata: Option<serde_json::Value>,
    pub reply_to: Option<MessageId>,
}

impl SendMessageRequest {
    /// 普通文本消息。
    pub fn text(room_id: RoomId, content: impl Into<String>) -> Self {
        Self {
            room_id,
            content: content.into(),
            kind: MessageKind::Text,
            metadata: None,
            reply_to: None,
        }
    }
}

pub struct MessageServiceDependencies {
    pub identity: Arc<dyn IdentityProvider>,
    pub profiles: Arc<dyn ProfileResolver>,
    pub rooms: Arc<dyn RoomRepository>,
    pub participants: Arc<dyn ParticipantRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub notifications: Arc<dyn NotificationRepository>,
    pub clock: Arc<dyn Clock>,
}

pub struct MessageService {
    deps: MessageServiceDependencies,
}

impl MessageService {
    pub fn new(deps: MessageServiceDependencies) -> Self {
        Self { deps }
    }

    fn require_user(&self) -> Result<UserId, ChatError> {
        self.deps
            .identity
            .current_user()
            .ok_or(ChatError::Authentication)
    }

    /// 持久化消息，并为房间内除发送者外的每个活跃参与者各写一行未读通知。
    /// 返回已落库的消息；排序位置由存储分配的创建时间与单调序列决定。
    pub async fn send_message(&self, request: SendMessageRequest) -> Result<Message, ChatError> {
        let sender_id = self.require_user()?;

        self.deps
            .rooms
            .find_by_id(request.room_id)
            .await?
            .ok_or_else(|| ChatError::not_found("room"))?;

        let participant = self
            .deps
            .participants
            .find(request.room_id, sender_id)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| ChatError::permission("send messages in this room"))?;
        if !participant.can_send_messages {
            return Err(ChatError::permission("send messages in this room"));
        }

        let content = MessageContent::new(request.content)?;
        let now = self.deps.clock.now();
        let message = Message::new(
            MessageId::from(Uuid::new_v4()),
            request.room_id,
            sender_id,
            content,
            request.kind,
            request.metadata,
            request.reply_to,
            now,
        );

        let stored = self.deps.messages.insert(message).await?;

        let recipients = self.deps.participants.list_active(request.room_id).await?;
        let notifications: Vec<Notification> = recipients
            .iter()
            .filter(|p| p.user_id != sender_id)
            .map(|p| {
                Notification::new(
                    NotificationId::from(Uuid::new_v4()),
                    p.user_id,
                    request.room_id,
                    stored.id,
                    now,
                )
            })
            .collect();
        if !notifications.is_empty() {
            self.deps.notifications.insert_many(notifications).await?;
        }

        Ok(stored)
    }

    /// 取一页历史，升序返回。存储按创建时间降序翻页（`before` 取更旧的
    /// 历史），这里解析发送者资料、挂上回复预览，再反转成时间正序，
    /// 调用方拿到的页因此总是按时间排好的。
    pub async fn get_messages(
        &self,
        room_id: RoomId,
        limit: u32,
        before: Option<domain::Timestamp>,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        self.require_user()?;

        let page = self.deps.messages.list_page(room_id, limit, before).await?;

        let reply_targets = self.load_reply_targets(&page).await?;
        let profiles = self.resolve_page_profiles(&page).await;

        let mut result: Vec<ChatMessage> = page
            .into_iter()
            .map(|message| {
                let sender = profiles.get(&message.sender_id).cloned();
                let reply_preview = message.reply_to.and_then(|id| {
                    reply_targets.get(&id).map(|target| ReplyPreview {
                        id: target.id,
                        content: target.content.as_str().to_owned(),
                        sender_id: target.sender_id,
                    })
                });
                ChatMessage {
                    message,
                    sender,
                    reply_preview,
                }
            })
            .collect();
        result.reverse();
        Ok(result)
    }

    /// 只有原发送者可以编辑；已删除的消息拒绝编辑，排序位置保持不变。
    pub async fn edit_message(
        &self,
        message_id: MessageId,
        new_content: impl Into<String>,
    ) -> Result<Message, ChatError> {
        let caller = self.require_user()?;

        let mut message = self
            .deps
            .messages
            .find_by_id(message_id)
            .await?
            .ok_or_else(|| ChatError::not_found("message"))?;
        if message.sender_id != caller {
            return Err(ChatError::permission("edit someone else's message"));
        }

        let content = MessageContent::new(new_content.into())?;
        message.edit(content, self.deps.clock.now())?;
        Ok(self.deps.messages.update(message).await?)
    }

    /// 只有原发送者可以删除；正文替换为墓碑文案，行与排序位置保留，
    /// 周围的会话上下文不受影响。
    pub async fn delete_message(&self, message_id: MessageId) -> Result<Message, ChatError> {
        let caller = self.require_user()?;

        let mut message = self
            .deps
            .messages
            .find_by_id(message_id)
            .await?
            .ok_or_else(|| ChatError::not_found("message"))?;
        if message.sender_id != caller {
            return Err(ChatError::permission("delete someone else's message"));
        }

        message.delete(self.deps.clock.now())?;
        Ok(self.deps.messages.update(message).await?)
    }

    async fn load_reply_targets(
        &self,
        page: &[Message],
    ) -> Result<HashMap<MessageId, Message>, ChatError> {
        let ids: Vec<MessageId> = page
            .iter()
            .filter_map(|m| m.reply_to)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let targets = self.deps.messages.find_many(&ids).await?;
        Ok(targets.into_iter().map(|m| (m.id, m)).collect())
    }

    /// 整页去重后一次批量解析。失败不让整个读路径失败，
    /// 页内所有发送者按未解析返回。
    async fn resolve_page_profiles(&self, page: &[Message]) -> HashMap<UserId, UserProfile> {
        let ids: Vec<UserId> = page
            .iter()
            .map(|m| m.sender_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        if ids.is_empty() {
            return HashMap::new();
        }
        match self.deps.profiles.resolve_profiles(&ids).await {
            Ok(profiles) => profiles,
            Err(error) => {
                warn!(%error, "sender profiles unresolved for message page");
                HashMap::new()
            }
        }
    }
}
