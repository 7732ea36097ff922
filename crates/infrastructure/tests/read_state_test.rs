//! 已读状态追踪：未读计数、置读、幂等。

mod common;

use application::{ParticipantRepository, SendMessageRequest};
use common::{user, TestEnv};
use domain::TripId;
use uuid::Uuid;

#[tokio::test]
async fn mark_read_drives_unread_to_zero_and_is_idempotent() {
    let env = TestEnv::new();
    let (a, b) = (user(), user());
    env.login(a);
    let room = env
        .rooms
        .create_trip_room(TripId::from(Uuid::new_v4()), "Rome", vec![b])
        .await
        .unwrap();

    env.messages
        .send_message(SendMessageRequest::text(room.id, "one"))
        .await
        .unwrap();
    env.messages
        .send_message(SendMessageRequest::text(room.id, "two"))
        .await
        .unwrap();

    env.login(b);
    // 欢迎消息 + 两条文本
    assert_eq!(env.read_state.unread_counts().await.unwrap()[&room.id], 3);

    env.read_state.mark_read(room.id).await.unwrap();
    assert!(env
        .read_state
        .unread_counts()
        .await
        .unwrap()
        .get(&room.id)
        .is_none());

    // 参与者行记下了已读时间
    let row = env.store.find(room.id, b).await.unwrap().unwrap();
    let first_read_at = row.last_read_at.unwrap();

    // 重复调用是廉价无操作，已读时间不被覆盖
    env.read_state.mark_read(room.id).await.unwrap();
    let row = env.store.find(room.id, b).await.unwrap().unwrap();
    assert_eq!(row.last_read_at, Some(first_read_at));
}

#[tokio::test]
async fn unread_counts_are_kept_per_room() {
    let env = TestEnv::new();
    let (a, b) = (user(), user());
    env.login(a);
    let first = env
        .rooms
        .create_trip_room(TripId::from(Uuid::new_v4()), "Rome", vec![b])
        .await
        .unwrap();
    let second = env.rooms.get_or_create_direct_room(b).await.unwrap();

    env.messages
        .send_message(SendMessageRequest::text(second.id, "direct ping"))
        .await
        .unwrap();

    env.login(b);
    let counts = env.read_state.unread_counts().await.unwrap();
    assert_eq!(counts[&first.id], 1); // 欢迎消息
    assert_eq!(counts[&second.id], 1);

    env.read_state.mark_read(second.id).await.unwrap();
    let counts = env.read_state.unread_counts().await.unwrap();
    assert_eq!(counts[&first.id], 1);
    assert!(counts.get(&second.id).is_none());
}
