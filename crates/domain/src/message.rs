use crate::errors::DomainError;
use crate::value_objects::{MessageContent, MessageId, RoomId, Timestamp, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[sqlx(type_name = "message_kind", rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    File,
    Location,
    System,
}

/// 删除消息后写入的固定墓碑文案，保留消息的排序位置。
pub const MESSAGE_TOMBSTONE: &str = "This message was deleted";

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub content: MessageContent,
    pub kind: MessageKind,
    /// 不透明的键值附加数据（图片尺寸、定位坐标等），本层不解释。
    pub metadata: serde_json::Value,
    pub is_edited: bool,
    pub edited_at: Option<Timestamp>,
    pub is_deleted: bool,
    pub deleted_at: Option<Timestamp>,
    pub reply_to: Option<MessageId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Message {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: MessageId,
        room_id: RoomId,
        sender_id: UserId,
        content: MessageContent,
        kind: MessageKind,
        metadata: Option<serde_json::Value>,
        reply_to: Option<MessageId>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            room_id,
            sender_id,
            content,
            kind,
            metadata: metadata.unwrap_or_else(|| serde_json::Value::Object(Default::default())),
            is_edited: false,
            edited_at: None,
            is_deleted: false,
            deleted_at: None,
            reply_to,
            created_at,
            updated_at: created_at,
        }
    }

    /// 替换正文。已删除的消息与系统消息拒绝编辑；
    /// `created_at` 不变，排序位置因此保持稳定。
    pub fn edit(&mut self, content: MessageContent, now: Timestamp) -> Result<(), DomainError> {
        if matches!(self.kind, MessageKind::System) {
            return Err(DomainError::SystemMessageImmutable);
        }
        if self.is_deleted {
            return Err(DomainError::MessageAlreadyDeleted);
        }
        self.content = content;
        self.is_edited = true;
        self.edited_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// 墓碑化：正文替换为固定文案，行本身与排序位置保留。
    /// 重复删除是无操作。
    pub fn delete(&mut self, now: Timestamp) -> Result<(), DomainError> {
        if matches!(self.kind, MessageKind::System) {
            return Err(DomainError::SystemMessageImmutable);
        }
        if self.is_deleted {
            return Ok(());
        }
        self.content = MessageContent::new(MESSAGE_TOMBSTONE)?;
        self.is_deleted = true;
        self.deleted_at = Some(now);
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn text_message() -> Message {
        Message::new(
            MessageId::from(Uuid::new_v4()),
            RoomId::from(Uuid::new_v4()),
            UserId::from(Uuid::new_v4()),
            MessageContent::new("hello").unwrap(),
            MessageKind::Text,
            None,
            None,
            time::OffsetDateTime::now_utc(),
        )
    }

    #[test]
    fn edit_sets_flags_and_keeps_created_at() {
        let mut message = text_message();
        let created_at = message.created_at;
        let now = time::OffsetDateTime::now_utc();

        message
            .edit(MessageContent::new("changed").unwrap(), now)
            .unwrap();

        assert!(message.is_edited);
        assert_eq!(message.edited_at, Some(now));
        assert_eq!(message.created_at, created_at);
        assert_eq!(message.content.as_str(), "changed");
    }

    #[test]
    fn delete_writes_tombstone_once() {
        let mut message = text_message();
        let now = time::OffsetDateTime::now_utc();

        message.delete(now).unwrap();
        assert!(message.is_deleted);
        assert_eq!(message.content.as_str(), MESSAGE_TOMBSTONE);

        // 第二次删除是无操作
        message.delete(now).unwrap();
        assert_eq!(message.deleted_at, Some(now));
    }

    #[test]
    fn edit_after_delete_is_rejected() {
        let mut message = text_message();
        let now = time::OffsetDateTime::now_utc();
        message.delete(now).unwrap();

        let result = message.edit(MessageContent::new("again").unwrap(), now);
        assert_eq!(result, Err(DomainError::MessageAlreadyDeleted));
        assert_eq!(message.content.as_str(), MESSAGE_TOMBSTONE);
    }

    #[test]
    fn system_messages_are_immutable() {
        let mut message = text_message();
        message.kind = MessageKind::System;
        let now = time::OffsetDateTime::now_utc();

        assert_eq!(
            message.edit(MessageContent::new("nope").unwrap(), now),
            Err(DomainError::SystemMessageImmutable)
        );
        assert_eq!(message.delete(now), Err(DomainError::SystemMessageImmutable));
    }
}
