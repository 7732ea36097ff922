//! 订阅分发器。
//!
//! 每个主题（某房间的消息流 / 某用户的房间列表）至多持有一个底层
//! 变更推送订阅，对本地监听者做引用计数扇出：
//!
//! - 首个监听者注册时建立底层订阅（未初始化 → 活跃）；
//! - 活跃期间新监听者只加入扇出集合；
//! - 最后一个监听者退出时撤销底层订阅恰好一次，主题回到未初始化，
//!   之后的新监听者重新建立全新订阅（间隙内的事件不回放）。
//!
//! 建立失败只记日志，订阅调用永不向上抛错：实时推送只是对拉取路径
//! 的尽力增强。整个注册表由构造出的实例持有，没有进程级全局状态；
//! 唯一的共享可变结构是主题表，由单个互斥锁保护，且从不跨 await 持锁。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use domain::{Message, RoomId, UserId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::change_feed::{ChangeFeed, FeedEvent, FeedTopic};
use crate::identity::{ProfileResolver, UserProfile};

/// 推送给房间消息监听者的事件，发送者资料已尽力解析。
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub message: Message,
    pub sender: Option<UserProfile>,
}

/// 推送给房间列表监听者的事件；收到后按需重新拉取房间列表。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomListEvent {
    pub room_id: RoomId,
}

#[derive(Debug, Clone)]
enum ChatUpdate {
    Message(MessageEvent),
    RoomList(RoomListEvent),
}

/// 已建立的底层订阅：guard 同步退订，pump 任务负责解析与扇出。
struct ActiveFeed {
    _guard: crate::change_feed::FeedGuard,
    pump: JoinHandle<()>,
}

impl Drop for ActiveFeed {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

struct TopicState {
    next_listener: u64,
    listeners: HashMap<u64, mpsc::UnboundedSender<ChatUpdate>>,
    feed: Option<ActiveFeed>,
}

impl TopicState {
    fn empty() -> Self {
        Self {
            next_listener: 0,
            listeners: HashMap::new(),
            feed: None,
        }
    }
}

struct DispatcherInner {
    feed: Arc<dyn ChangeFeed>,
    profiles: Arc<dyn ProfileResolver>,
    topics: Mutex<HashMap<FeedTopic, TopicState>>,
}

pub struct SubscriptionDispatcher {
    inner: Arc<DispatcherInner>,
}

impl SubscriptionDispatcher {
    pub fn new(feed: Arc<dyn ChangeFeed>, profiles: Arc<dyn ProfileResolver>) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                feed,
                profiles,
                topics: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// 监听某房间的新消息。退订 = drop 返回的句柄，同步生效。
    pub async fn subscribe_to_messages(&self, room_id: RoomId) -> MessageSubscription {
        let (handle, receiver) = self.register(FeedTopic::RoomMessages(room_id)).await;
        MessageSubscription {
            receiver,
            _handle: handle,
        }
    }

    /// 监听某用户的房间列表变化。
    pub async fn subscribe_to_room_list(&self, user_id: UserId) -> RoomListSubscription {
        let (handle, receiver) = self.register(FeedTopic::RoomList(user_id)).await;
        RoomListSubscription {
            receiver,
            _handle: handle,
        }
    }

    /// 当前持有监听者的主题数，观测与测试用。
    pub fn active_topics(&self) -> usize {
        self.inner.topics.lock().unwrap().len()
    }

    async fn register(
        &self,
        topic: FeedTopic,
    ) -> (ListenerHandle, mpsc::UnboundedReceiver<ChatUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut topics = self.inner.topics.lock().unwrap();
            let state = topics.entry(topic).or_insert_with(TopicState::empty);
            let id = state.next_listener;
            state.next_listener += 1;
            state.listeners.insert(id, tx);
            id
        };
        self.ensure_feed(topic).await;
        let handle = ListenerHandle {
            inner: Arc::clone(&self.inner),
            topic,
            id,
        };
        (handle, rx)
    }

    /// 主题尚无底层订阅时尝试建立。失败只记警告，主题停留在未初始化，
    /// 之后的注册会再次尝试。
    async fn ensure_feed(&self, topic: FeedTopic) {
        let needs_feed = {
            let topics = self.inner.topics.lock().unwrap();
            topics.get(&topic).is_some_and(|state| state.feed.is_none())
        };
        if !needs_feed {
            return;
        }

        match self.inner.feed.subscribe(&topic).await {
            Ok(subscription) => {
                let (receiver, guard) = subscription.into_parts();
                let mut topics = self.inner.topics.lock().unwrap();
                match topics.get_mut(&topic) {
                    // 等待期间可能所有监听者已退订，或并发注册已经建好
                    Some(state) if state.feed.is_none() => {
                        let pump =
                            tokio::spawn(run_pump(Arc::clone(&self.inner), topic, receiver));
                        state.feed = Some(ActiveFeed {
                            _guard: guard,
                            pump,
                        });
                    }
                    _ => drop(guard),
                }
            }
            Err(error) => {
                warn!(?topic, %error, "change feed subscription failed, topic stays inactive");
            }
        }
    }
}

/// 按到达顺序消费底层事件，解析发送者资料后扇出给全部监听者。
/// 每个主题只有一个 pump，房间内的投递顺序因此与存储写入顺序一致。
async fn run_pump(
    inner: Arc<DispatcherInner>,
    topic: FeedTopic,
    mut receiver: mpsc::UnboundedReceiver<FeedEvent>,
) {
    while let Some(event) = receiver.recv().await {
        if !event.matches(&topic) {
            continue;
        }
        let update = match event {
            FeedEvent::MessageInserted(message) => {
                let sender = resolve_sender(inner.profiles.as_ref(), message.sender_id).await;
                ChatUpdate::Message(MessageEvent { message, sender })
            }
            FeedEvent::ParticipantChanged { room_id, .. } => {
                ChatUpdate::RoomList(RoomListEvent { room_id })
            }
        };

        let topics = inner.topics.lock().unwrap();
        match topics.get(&topic) {
            Some(state) => {
                for listener in state.listeners.values() {
                    // 接收端已 drop 的监听者在这里静默跳过
                    let _ = listener.send(update.clone());
                }
            }
            None => break,
        }
    }
}

async fn resolve_sender(profiles: &dyn ProfileResolver, sender_id: UserId) -> Option<UserProfile> {
    match profiles.resolve_profiles(&[sender_id]).await {
        Ok(mut map) => map.remove(&sender_id),
        Err(error) => {
            debug!(%sender_id, %error, "sender profile unresolved for pushed message");
            None
        }
    }
}

/// 监听者句柄：drop 时从扇出集合移除自己；若是最后一个，
/// 整个主题状态（含底层订阅）随之同步释放。
struct ListenerHandle {
    inner: Arc<DispatcherInner>,
    topic: FeedTopic,
    id: u64,
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        let mut topics = self.inner.topics.lock().unwrap();
        if let Some(state) = topics.get_mut(&self.topic) {
            state.listeners.remove(&self.id);
            if state.listeners.is_empty() {
                topics.remove(&self.topic);
            }
        }
    }
}

pub struct MessageSubscription {
    receiver: mpsc::UnboundedReceiver<ChatUpdate>,
    _handle: ListenerHandle,
}

impl MessageSubscription {
    /// 下一条推送的消息；主题被撤销后返回 None。
    pub async fn recv(&mut self) -> Option<MessageEvent> {
        loop {
            match self.receiver.recv().await? {
                ChatUpdate::Message(event) => return Some(event),
                ChatUpdate::RoomList(_) => continue,
            }
        }
    }
}

pub struct RoomListSubscription {
    receiver: mpsc::UnboundedReceiver<ChatUpdate>,
    _handle: ListenerHandle,
}

impl RoomListSubscription {
    pub async fn recv(&mut self) -> Option<RoomListEvent> {
        loop {
            match self.receiver.recv().await? {
                ChatUpdate::RoomList(event) => return Some(event),
                ChatUpdate::Message(_) => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change_feed::{FeedError, FeedGuard, FeedSubscription};
    use crate::identity::ProfileError;
    use async_trait::async_trait;
    use domain::{MessageContent, MessageId, MessageKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    struct EmptyProfiles;

    #[async_trait]
    impl ProfileResolver for EmptyProfiles {
        async fn resolve_profiles(
            &self,
            _ids: &[UserId],
        ) -> Result<HashMap<UserId, UserProfile>, ProfileError> {
            Ok(HashMap::new())
        }
    }

    /// 手写的内存推送源：记录订阅次数与当前活跃订阅数。
    struct StubFeed {
        senders: Mutex<Vec<mpsc::UnboundedSender<FeedEvent>>>,
        subscribe_calls: AtomicUsize,
        active: Arc<AtomicUsize>,
    }

    impl StubFeed {
        fn new() -> Self {
            Self {
                senders: Mutex::new(Vec::new()),
                subscribe_calls: AtomicUsize::new(0),
                active: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn emit(&self, event: FeedEvent) {
            for sender in self.senders.lock().unwrap().iter() {
                let _ = sender.send(event.clone());
            }
        }
    }

    #[async_trait]
    impl ChangeFeed for StubFeed {
        async fn subscribe(&self, _topic: &FeedTopic) -> Result<FeedSubscription, FeedError> {
            self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
            self.active.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::unbounded_channel();
            self.senders.lock().unwrap().push(tx);
            let active = Arc::clone(&self.active);
            let guard = FeedGuard::new(move || {
                active.fetch_sub(1, Ordering::SeqCst);
            });
            Ok(FeedSubscription::new(rx, guard))
        }
    }

    struct FailingFeed;

    #[async_trait]
    impl ChangeFeed for FailingFeed {
        async fn subscribe(&self, _topic: &FeedTopic) -> Result<FeedSubscription, FeedError> {
            Err(FeedError::unavailable("connection refused"))
        }
    }

    fn test_message(room_id: RoomId) -> Message {
        Message::new(
            MessageId::from(Uuid::new_v4()),
            room_id,
            UserId::from(Uuid::new_v4()),
            MessageContent::new("hi").unwrap(),
            MessageKind::Text,
            None,
            None,
            time::OffsetDateTime::now_utc(),
        )
    }

    #[tokio::test]
    async fn fan_out_reaches_every_listener_of_a_topic() {
        let feed = Arc::new(StubFeed::new());
        let dispatcher =
            SubscriptionDispatcher::new(feed.clone(), Arc::new(EmptyProfiles));
        let room_id = RoomId::from(Uuid::new_v4());

        let mut first = dispatcher.subscribe_to_messages(room_id).await;
        let mut second = dispatcher.subscribe_to_messages(room_id).await;

        // 同主题的第二个监听者不会再建底层订阅
        assert_eq!(feed.subscribe_calls.load(Ordering::SeqCst), 1);

        let message = test_message(room_id);
        feed.emit(FeedEvent::MessageInserted(message.clone()));

        let got_first = first.recv().await.unwrap();
        let got_second = second.recv().await.unwrap();
        assert_eq!(got_first.message.id, message.id);
        assert_eq!(got_second.message.id, message.id);
    }

    #[tokio::test]
    async fn last_listener_tears_down_and_resubscribe_is_fresh() {
        let feed = Arc::new(StubFeed::new());
        let dispatcher =
            SubscriptionDispatcher::new(feed.clone(), Arc::new(EmptyProfiles));
        let room_id = RoomId::from(Uuid::new_v4());

        let first = dispatcher.subscribe_to_messages(room_id).await;
        let second = dispatcher.subscribe_to_messages(room_id).await;
        assert_eq!(feed.active.load(Ordering::SeqCst), 1);

        drop(first);
        // 还有监听者，底层订阅保持
        assert_eq!(feed.active.load(Ordering::SeqCst), 1);

        drop(second);
        // 最后一个退出：撤销恰好一次，同步生效
        assert_eq!(feed.active.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.active_topics(), 0);

        let _third = dispatcher.subscribe_to_messages(room_id).await;
        assert_eq!(feed.subscribe_calls.load(Ordering::SeqCst), 2);
        assert_eq!(feed.active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_establishment_keeps_topic_silent_without_error() {
        let dispatcher =
            SubscriptionDispatcher::new(Arc::new(FailingFeed), Arc::new(EmptyProfiles));
        let room_id = RoomId::from(Uuid::new_v4());

        let mut subscription = dispatcher.subscribe_to_messages(room_id).await;
        assert_eq!(dispatcher.active_topics(), 1);

        let received =
            tokio::time::timeout(Duration::from_millis(50), subscription.recv()).await;
        assert!(received.is_err(), "silent topic must not deliver events");
    }

    #[tokio::test]
    async fn events_for_other_rooms_are_filtered_out() {
        let feed = Arc::new(StubFeed::new());
        let dispatcher =
            SubscriptionDispatcher::new(feed.clone(), Arc::new(EmptyProfiles));
        let room_id = RoomId::from(Uuid::new_v4());
        let other_room = RoomId::from(Uuid::new_v4());

        let mut subscription = dispatcher.subscribe_to_messages(room_id).await;

        feed.emit(FeedEvent::MessageInserted(test_message(other_room)));
        let expected = test_message(room_id);
        feed.emit(FeedEvent::MessageInserted(expected.clone()));

        let got = subscription.recv().await.unwrap();
        assert_eq!(got.message.id, expected.id);
    }
}
