//! 房间与参与者管理。

use std::collections::HashSet;
use std::sync::Arc;

use domain::{
    ChatRoom, Participant, ParticipantRole, RoomId, RoomKind, TripId, UserId,
    DIRECT_ROOM_CAPACITY,
};
use tracing::warn;
use uuid::Uuid;

use crate::clock::Clock;
use crate::dto::RoomParticipant;
use crate::error::ChatError;
use crate::identity::{IdentityProvider, ProfileResolver};
use crate::repository::{ParticipantRepository, RoomRepository};
use crate::services::message_service::{MessageService, SendMessageRequest};

#[derive(Debug, Clone)]
pub struct CreateRoomRequest {
    pub kind: RoomKind,
    pub name: Option<String>,
    pub description: Option<String>,
    pub trip_id: Option<TripId>,
    pub is_private: bool,
    pub max_participants: Option<u32>,
    /// 除创建者以外的初始参与者。
    pub participant_ids: Vec<UserId>,
}

impl CreateRoomRequest {
    pub fn direct(other: UserId) -> Self {
        Self {
            kind: RoomKind::Direct,
            name: None,
            description: None,
            trip_id: None,
            is_private: true,
            max_participants: None,
            participant_ids: vec![other],
        }
    }
}

pub struct RoomServiceDependencies {
    pub identity: Arc<dyn IdentityProvider>,
    pub profiles: Arc<dyn ProfileResolver>,
    pub rooms: Arc<dyn RoomRepository>,
    pub participants: Arc<dyn ParticipantRepository>,
    /// 行程房间的欢迎消息走正常的消息管道。
    pub message_pipeline: Arc<MessageService>,
    pub clock: Arc<dyn Clock>,
}

pub struct RoomService {
    deps: RoomServiceDependencies,
}

impl RoomService {
    pub fn new(deps: RoomServiceDependencies) -> Self {
        Self { deps }
    }

    fn require_user(&self) -> Result<UserId, ChatError> {
        self.deps
            .identity
            .current_user()
            .ok_or(ChatError::Authentication)
    }

    /// 创建房间：校验 kind 约束，原子写入房间和房主参与者行，
    /// 再把其余初始成员按 member 角色加入。
    pub async fn create_room(&self, request: CreateRoomRequest) -> Result<ChatRoom, ChatError> {
        let creator = self.require_user()?;
        let now = self.deps.clock.now();
        let room_id = RoomId::from(Uuid::new_v4());

        // 去重并剔除创建者自己
        let mut seen = HashSet::new();
        let others: Vec<UserId> = request
            .participant_ids
            .iter()
            .copied()
            .filter(|id| *id != creator && seen.insert(*id))
            .collect();

        let room = match request.kind {
            RoomKind::Direct => {
                if others.len() != 1 {
                    return Err(ChatError::validation(
                        "participant_ids",
                        "a direct room needs exactly one other participant",
                    ));
                }
                ChatRoom::new_direct(room_id, creator, now)
            }
            RoomKind::Group => ChatRoom::new_group(
                room_id,
                request.name,
                request.description,
                request.is_private,
                request.max_participants,
                creator,
                now,
            )?,
            RoomKind::Trip => ChatRoom::new_trip(
                room_id,
                request.trip_id,
                request.name,
                request.max_participants,
                creator,
                now,
            )?,
        };

        let total = others.len() as u32 + 1;
        if total > room.max_participants {
            return Err(ChatError::validation(
                "participant_ids",
                "more initial participants than the room allows",
            ));
        }

        let owner = Participant::new(room.id, creator, ParticipantRole::Owner, now);
        let created = self.deps.rooms.create_with_owner(room, owner).await?;

        for user_id in others {
            let member = Participant::new(created.id, user_id, ParticipantRole::Member, now);
            self.deps.participants.upsert(member).await?;
        }

        Ok(created)
    }

    /// 幂等获取与某个用户的单聊房间。扫描调用者参与的全部单聊房间，
    /// 在内存中筛选恰好 {caller, other} 的活跃二人组合；单聊房间
    /// 数量按用户计很小，这里的全量扫描是规模上界而非正确性问题。
    pub async fn get_or_create_direct_room(&self, other: UserId) -> Result<ChatRoom, ChatError> {
        let caller = self.require_user()?;
        if other == caller {
            return Err(ChatError::validation(
                "user_id",
                "cannot open a direct room with yourself",
            ));
        }

        let candidates = self.deps.rooms.list_direct_for_user(caller).await?;
        for room in candidates {
            let members = self.deps.participants.list_active(room.id).await?;
            if members.len() as u32 == DIRECT_ROOM_CAPACITY
                && members.iter().any(|p| p.user_id == other)
                && members.iter().any(|p| p.user_id == caller)
            {
                return Ok(room);
            }
        }

        self.create_room(CreateRoomRequest::direct(other)).await
    }

    /// 为行程建群：行程名生成房间名，成员加入后发一条系统欢迎消息。
    pub async fn create_trip_room(
        &self,
        trip_id: TripId,
        trip_name: &str,
        participant_ids: Vec<UserId>,
    ) -> Result<ChatRoom, ChatError> {
        let room = self
            .create_room(CreateRoomRequest {
                kind: RoomKind::Trip,
                name: Some(format!("Trip: {trip_name}")),
                description: None,
                trip_id: Some(trip_id),
                is_private: true,
                max_participants: None,
                participant_ids,
            })
            .await?;

        let welcome = SendMessageRequest {
            room_id: room.id,
            content: format!("Welcome to the group chat for {trip_name}!"),
            kind: domain::MessageKind::System,
            metadata: None,
            reply_to: None,
        };
        self.deps.message_pipeline.send_message(welcome).await?;

        Ok(room)
    }

    /// 加人。调用者需要 can_add_participants 能力或是房间创建者。
    pub async fn add_participant(
        &self,
        room_id: RoomId,
        user_id: UserId,
        role: ParticipantRole,
    ) -> Result<Participant, ChatError> {
        let caller = self.require_user()?;

        let room = self
            .deps
            .rooms
            .find_by_id(room_id)
            .await?
            .ok_or_else(|| ChatError::not_found("room"))?;
        if room.is_direct() {
            return Err(ChatError::validation(
                "room_id",
                "direct rooms cannot take more participants",
            ));
        }

        let caller_row = self
            .deps
            .participants
            .find(room_id, caller)
            .await?
            .filter(|p| p.is_active);
        let allowed = room.created_by == caller
            || caller_row.is_some_and(|p| p.can_add_participants);
        if !allowed {
            return Err(ChatError::permission("add participants to this room"));
        }

        if let Some(existing) = self.deps.participants.find(room_id, user_id).await? {
            if existing.is_active {
                return Err(ChatError::validation(
                    "user_id",
                    "user is already a participant",
                ));
            }
        }

        let active = self.deps.participants.count_active(room_id).await?;
        if active >= room.max_participants {
            return Err(ChatError::validation("room_id", "room is full"));
        }

        let participant = Participant::new(room_id, user_id, role, self.deps.clock.now());
        Ok(self.deps.participants.upsert(participant).await?)
    }

    /// 删除房间，仅创建者可用；参与者、消息、通知一并级联。
    pub async fn delete_room(&self, room_id: RoomId) -> Result<(), ChatError> {
        let caller = self.require_user()?;

        let room = self
            .deps
            .rooms
            .find_by_id(room_id)
            .await?
            .ok_or_else(|| ChatError::not_found("room"))?;
        if room.created_by != caller {
            return Err(ChatError::permission("delete this room"));
        }

        self.deps.rooms.delete(room_id).await?;
        Ok(())
    }

    /// 离开房间：参与者行置 inactive，不删除，成员历史保留。
    pub async fn leave_room(&self, room_id: RoomId) -> Result<(), ChatError> {
        let caller = self.require_user()?;

        let room = self
            .deps
            .rooms
            .find_by_id(room_id)
            .await?
            .ok_or_else(|| ChatError::not_found("room"))?;
        if room.is_direct() {
            return Err(ChatError::validation(
                "room_id",
                "direct rooms cannot be left",
            ));
        }

        self.deps
            .participants
            .find(room_id, caller)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| ChatError::not_found("participant"))?;

        self.deps.participants.deactivate(room_id, caller).await?;
        Ok(())
    }

    /// 活跃参与者列表，资料批量解析；个别用户解析不到时
    /// 以未解析条目返回，而不是让整个调用失败。
    pub async fn get_participants(
        &self,
        room_id: RoomId,
    ) -> Result<Vec<RoomParticipant>, ChatError> {
        self.require_user()?;

        let participants = self.deps.participants.list_active(room_id).await?;
        let ids: Vec<UserId> = participants.iter().map(|p| p.user_id).collect();

        let mut profiles = match self.deps.profiles.resolve_profiles(&ids).await {
            Ok(profiles) => profiles,
            Err(error) => {
                warn!(%room_id, %error, "participant profiles unresolved");
                Default::default()
            }
        };

        Ok(participants
            .into_iter()
            .map(|participant| {
                let profile = profiles.remove(&participant.user_id);
                RoomParticipant {
                    participant,
                    profile,
                }
            })
            .collect())
    }

    /// 调用者的全部聊天房间。
    pub async fn get_user_chat_rooms(&self) -> Result<Vec<ChatRoom>, ChatError> {
        let caller = self.require_user()?;
        Ok(self.deps.rooms.list_for_user(caller).await?)
    }
}
