//! 降级层：后端不可用时读路径返回合成数据，写路径照常报错。

mod common;

use application::{ChatError, SendMessageRequest};
use common::{user, TestEnv};
use domain::TripId;
use infrastructure::fallback_rooms;
use uuid::Uuid;

#[tokio::test]
async fn reads_degrade_to_synthetic_data_when_store_is_down() {
    let env = TestEnv::with_fallback();
    let a = user();
    env.login(a);

    let room = env
        .rooms
        .create_trip_room(TripId::from(Uuid::new_v4()), "Berlin", vec![user()])
        .await
        .unwrap();

    env.store.set_offline(true);

    // 房间列表与消息页不抛错、非空
    let rooms = env.rooms.get_user_chat_rooms().await.unwrap();
    assert!(!rooms.is_empty());
    assert_eq!(rooms, fallback_rooms());

    let messages = env.messages.get_messages(room.id, 50, None).await.unwrap();
    assert!(!messages.is_empty());
    // 合成消息挂在调用方查询的房间下，页内时间正序
    assert!(messages.iter().all(|m| m.message.room_id == room.id));
    for window in messages.windows(2) {
        assert!(window[0].message.created_at <= window[1].message.created_at);
    }

    // 参与者列表与未读计数降级为空结果
    assert!(env.rooms.get_participants(room.id).await.unwrap().is_empty());
    assert!(env.read_state.unread_counts().await.unwrap().is_empty());
}

#[tokio::test]
async fn writes_surface_backend_errors_unchanged() {
    let env = TestEnv::with_fallback();
    let (a, b) = (user(), user());
    env.login(a);

    let room = env
        .rooms
        .create_trip_room(TripId::from(Uuid::new_v4()), "Berlin", vec![b])
        .await
        .unwrap();

    env.store.set_offline(true);

    let send = env
        .messages
        .send_message(SendMessageRequest::text(room.id, "lost"))
        .await;
    assert!(matches!(send, Err(ChatError::Backend(_))));

    let delete = env.rooms.delete_room(room.id).await;
    assert!(matches!(delete, Err(ChatError::Backend(_))));

    let create = env
        .rooms
        .create_trip_room(TripId::from(Uuid::new_v4()), "Nope", vec![b])
        .await;
    assert!(matches!(create, Err(ChatError::Backend(_))));
}

#[tokio::test]
async fn recovery_restores_real_data() {
    let env = TestEnv::with_fallback();
    let (a, b) = (user(), user());
    env.login(a);

    let room = env
        .rooms
        .create_trip_room(TripId::from(Uuid::new_v4()), "Porto", vec![b])
        .await
        .unwrap();
    env.messages
        .send_message(SendMessageRequest::text(room.id, "real data"))
        .await
        .unwrap();

    env.store.set_offline(true);
    let degraded = env.rooms.get_user_chat_rooms().await.unwrap();
    assert_eq!(degraded, fallback_rooms());

    env.store.set_offline(false);
    let rooms = env.rooms.get_user_chat_rooms().await.unwrap();
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0].id, room.id);

    let page = env.messages.get_messages(room.id, 10, None).await.unwrap();
    assert_eq!(
        page.last().unwrap().message.content.as_str(),
        "real data"
    );
}
