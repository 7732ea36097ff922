//! 房间与参与者生命周期的端到端测试，跑在内存网关上。

mod common;

use application::{ChatError, IdentityProvider, ParticipantRepository, RoomRepository};
use common::{user, TestEnv};
use domain::{MessageKind, ParticipantRole, RoomKind, TripId};
use uuid::Uuid;

#[tokio::test]
async fn trip_room_has_owner_and_welcome_message() {
    let env = TestEnv::new();
    let (a, b, c) = (user(), user(), user());
    env.login(a);

    let room = env
        .rooms
        .create_trip_room(TripId::from(Uuid::new_v4()), "Alps Trip", vec![b, c])
        .await
        .unwrap();

    assert_eq!(room.kind, RoomKind::Trip);
    assert!(room.trip_id.is_some());
    assert_eq!(room.name.as_deref(), Some("Trip: Alps Trip"));

    let participants = env.rooms.get_participants(room.id).await.unwrap();
    assert_eq!(participants.len(), 3);
    let creator = participants
        .iter()
        .find(|p| p.participant.user_id == a)
        .unwrap();
    assert_eq!(creator.participant.role, ParticipantRole::Owner);

    // 建群动作以一条系统欢迎消息收尾
    let history = env.messages.get_messages(room.id, 10, None).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].message.kind, MessageKind::System);
    assert!(history[0].message.content.as_str().contains("Alps Trip"));
}

#[tokio::test]
async fn direct_room_is_idempotent_for_both_sides() {
    let env = TestEnv::new();
    let (a, b) = (user(), user());

    env.login(a);
    let first = env.rooms.get_or_create_direct_room(b).await.unwrap();
    let second = env.rooms.get_or_create_direct_room(b).await.unwrap();
    assert_eq!(first.id, second.id);

    // 对方发起也命中同一个房间
    env.login(b);
    let from_other_side = env.rooms.get_or_create_direct_room(a).await.unwrap();
    assert_eq!(from_other_side.id, first.id);

    let participants = env.rooms.get_participants(first.id).await.unwrap();
    assert_eq!(participants.len(), 2);
}

#[tokio::test]
async fn direct_room_rejects_wrong_participant_count() {
    let env = TestEnv::new();
    env.login(user());

    let mut request = application::CreateRoomRequest::direct(user());
    request.participant_ids.push(user());
    let result = env.rooms.create_room(request).await;
    assert!(matches!(result, Err(ChatError::Validation { .. })));

    let with_self = env.rooms.get_or_create_direct_room(
        env.identity.current_user().unwrap(),
    );
    assert!(matches!(
        with_self.await,
        Err(ChatError::Validation { .. })
    ));
}

#[tokio::test]
async fn add_participant_requires_capability() {
    let env = TestEnv::new();
    let (a, b, c) = (user(), user(), user());

    env.login(a);
    let room = env
        .rooms
        .create_trip_room(TripId::from(Uuid::new_v4()), "Kyoto", vec![b])
        .await
        .unwrap();

    // 普通成员默认没有拉人能力
    env.login(b);
    let denied = env
        .rooms
        .add_participant(room.id, c, ParticipantRole::Member)
        .await;
    assert!(matches!(denied, Err(ChatError::Permission { .. })));

    env.login(a);
    env.rooms
        .add_participant(room.id, c, ParticipantRole::Member)
        .await
        .unwrap();

    let repeated = env
        .rooms
        .add_participant(room.id, c, ParticipantRole::Member)
        .await;
    assert!(matches!(repeated, Err(ChatError::Validation { .. })));

    let participants = env.rooms.get_participants(room.id).await.unwrap();
    assert_eq!(participants.len(), 3);
}

#[tokio::test]
async fn leaving_keeps_the_membership_row() {
    let env = TestEnv::new();
    let (a, b) = (user(), user());

    env.login(a);
    let room = env
        .rooms
        .create_trip_room(TripId::from(Uuid::new_v4()), "Oslo", vec![b])
        .await
        .unwrap();

    env.login(b);
    env.rooms.leave_room(room.id).await.unwrap();

    let participants = env.rooms.get_participants(room.id).await.unwrap();
    assert_eq!(participants.len(), 1);

    // 行还在，只是不再活跃
    let row = env.store.find(room.id, b).await.unwrap().unwrap();
    assert!(!row.is_active);

    // 再次离开已经不是活跃参与者
    let again = env.rooms.leave_room(room.id).await;
    assert!(matches!(again, Err(ChatError::NotFound { .. })));
}

#[tokio::test]
async fn direct_rooms_cannot_be_left() {
    let env = TestEnv::new();
    let (a, b) = (user(), user());

    env.login(a);
    let room = env.rooms.get_or_create_direct_room(b).await.unwrap();

    let result = env.rooms.leave_room(room.id).await;
    assert!(matches!(result, Err(ChatError::Validation { .. })));
}

#[tokio::test]
async fn delete_room_is_creator_only_and_cascades() {
    let env = TestEnv::new();
    let (a, b) = (user(), user());

    env.login(a);
    let room = env
        .rooms
        .create_trip_room(TripId::from(Uuid::new_v4()), "Lisbon", vec![b])
        .await
        .unwrap();

    env.login(b);
    let denied = env.rooms.delete_room(room.id).await;
    assert!(matches!(denied, Err(ChatError::Permission { .. })));

    env.login(a);
    env.rooms.delete_room(room.id).await.unwrap();

    assert!(env.store.find_by_id(room.id).await.unwrap().is_none());
    assert!(env.rooms.get_user_chat_rooms().await.unwrap().is_empty());
    assert!(env
        .messages
        .get_messages(room.id, 10, None)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn anonymous_callers_are_rejected() {
    let env = TestEnv::new();

    let result = env.rooms.get_or_create_direct_room(user()).await;
    assert!(matches!(result, Err(ChatError::Authentication)));
}
