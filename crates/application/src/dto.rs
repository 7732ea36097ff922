//! 暴露给 UI 协作方的读模型。

use domain::{Message, MessageId, Participant, UserId};
use serde::{Deserialize, Serialize};

use crate::identity::UserProfile;

/// 参与者加上已解析的展示资料；解析失败时 `profile` 为 None，
/// id 仍然存在，调用方按"暂未解析"渲染。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomParticipant {
    pub participant: Participant,
    pub profile: Option<UserProfile>,
}

/// 回复目标的轻量预览。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyPreview {
    pub id: MessageId,
    pub content: String,
    pub sender_id: UserId,
}

/// 一条消息加上发送者资料与可选的回复预览。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message: Message,
    pub sender: Option<UserProfile>,
    pub reply_preview: Option<ReplyPreview>,
}
