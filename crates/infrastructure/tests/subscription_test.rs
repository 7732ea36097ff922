//! 订阅分发器跑在进程内变更推送上的端到端测试。

mod common;

use std::time::Duration;

use application::{MessageEvent, SendMessageRequest};
use common::{user, TestEnv};
use domain::TripId;
use tokio::time::timeout;
use uuid::Uuid;

async fn next_message(
    subscription: &mut application::MessageSubscription,
) -> MessageEvent {
    timeout(Duration::from_secs(1), subscription.recv())
        .await
        .expect("no event within deadline")
        .expect("subscription closed")
}

#[tokio::test]
async fn sender_and_receiver_share_the_same_update_path() {
    let env = TestEnv::new();
    let (a, b) = (user(), user());
    env.profiles.insert(a, "Alice");
    env.login(a);
    let room = env
        .rooms
        .create_trip_room(TripId::from(Uuid::new_v4()), "Lyon", vec![b])
        .await
        .unwrap();

    let mut sender_side = env.dispatcher.subscribe_to_messages(room.id).await;
    let mut receiver_side = env.dispatcher.subscribe_to_messages(room.id).await;

    env.messages
        .send_message(SendMessageRequest::text(room.id, "Hello"))
        .await
        .unwrap();

    // 发送者和接收者通过同一条订阅通道拿到更新
    let to_sender = next_message(&mut sender_side).await;
    let to_receiver = next_message(&mut receiver_side).await;
    assert_eq!(to_sender.message.content.as_str(), "Hello");
    assert_eq!(to_receiver.message.content.as_str(), "Hello");
    // 发送者资料已解析
    assert_eq!(to_receiver.sender.unwrap().display_name, "Alice");
}

#[tokio::test]
async fn delivery_order_matches_store_order() {
    let env = TestEnv::new();
    let (a, b) = (user(), user());
    env.login(a);
    let room = env
        .rooms
        .create_trip_room(TripId::from(Uuid::new_v4()), "Lyon", vec![b])
        .await
        .unwrap();

    let mut subscription = env.dispatcher.subscribe_to_messages(room.id).await;

    for index in 0..3 {
        env.messages
            .send_message(SendMessageRequest::text(room.id, format!("m{index}")))
            .await
            .unwrap();
    }

    for index in 0..3 {
        let event = next_message(&mut subscription).await;
        assert_eq!(event.message.content.as_str(), format!("m{index}"));
    }
}

#[tokio::test]
async fn room_list_subscription_sees_membership_changes() {
    let env = TestEnv::new();
    let (a, b) = (user(), user());

    let mut b_room_list = env.dispatcher.subscribe_to_room_list(b).await;

    env.login(a);
    let room = env
        .rooms
        .create_trip_room(TripId::from(Uuid::new_v4()), "Lyon", vec![b])
        .await
        .unwrap();

    let event = timeout(Duration::from_secs(1), b_room_list.recv())
        .await
        .expect("no event within deadline")
        .expect("subscription closed");
    assert_eq!(event.room_id, room.id);

    // 离开同样触发房间列表刷新
    env.login(b);
    env.rooms.leave_room(room.id).await.unwrap();
    let event = timeout(Duration::from_secs(1), b_room_list.recv())
        .await
        .expect("no event within deadline")
        .expect("subscription closed");
    assert_eq!(event.room_id, room.id);
}

#[tokio::test]
async fn underlying_feed_is_reference_counted() {
    let env = TestEnv::new();
    let room_id = domain::RoomId::from(Uuid::new_v4());
    let feed = env.store.feed();

    let first = env.dispatcher.subscribe_to_messages(room_id).await;
    let second = env.dispatcher.subscribe_to_messages(room_id).await;
    // 两个监听者共享一条底层订阅
    assert_eq!(feed.active_subscriptions(), 1);

    drop(first);
    assert_eq!(feed.active_subscriptions(), 1);

    drop(second);
    // 最后一个监听者退出，底层订阅同步撤销
    assert_eq!(feed.active_subscriptions(), 0);

    let third = env.dispatcher.subscribe_to_messages(room_id).await;
    assert_eq!(feed.active_subscriptions(), 1);
    drop(third);
    assert_eq!(feed.active_subscriptions(), 0);
}
