//! 内存实现。
//!
//! 单进程部署与测试用的持久化网关和变更推送。语义与 PostgreSQL
//! 实现保持一致：消息的插入顺序充当同时间戳的单调序列，
//! 房间与房主在同一把锁内落地。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use application::change_feed::{
    ChangeFeed, FeedError, FeedEvent, FeedGuard, FeedPublisher, FeedSubscription, FeedTopic,
};
use application::repository::{
    MessageRepository, NotificationRepository, ParticipantRepository, RoomRepository,
};
use async_trait::async_trait;
use domain::{
    ChatRoom, Message, MessageId, Notification, Participant, RepositoryError, RepositoryResult,
    RoomId, Timestamp, UserId,
};
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

/// 进程内变更推送：一条广播总线，按主题过滤后转发给订阅者。
#[derive(Clone)]
pub struct LocalChangeFeed {
    sender: broadcast::Sender<FeedEvent>,
    active: Arc<AtomicUsize>,
}

impl LocalChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 当前存活的底层订阅数，观测与测试用。
    pub fn active_subscriptions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

impl Default for LocalChangeFeed {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl ChangeFeed for LocalChangeFeed {
    async fn subscribe(&self, topic: &FeedTopic) -> Result<FeedSubscription, FeedError> {
        let mut source = self.sender.subscribe();
        let topic = *topic;
        let (tx, rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(event) => {
                        if event.matches(&topic) && tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "local change feed lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        self.active.fetch_add(1, Ordering::SeqCst);
        let active = Arc::clone(&self.active);
        let guard = FeedGuard::new(move || {
            pump.abort();
            active.fetch_sub(1, Ordering::SeqCst);
        });
        Ok(FeedSubscription::new(rx, guard))
    }
}

#[async_trait]
impl FeedPublisher for LocalChangeFeed {
    async fn publish(&self, event: FeedEvent) -> Result<(), FeedError> {
        // 当前没有订阅者不算失败
        let _ = self.sender.send(event);
        Ok(())
    }
}

#[derive(Default)]
struct MemoryState {
    rooms: HashMap<RoomId, ChatRoom>,
    participants: HashMap<(RoomId, UserId), Participant>,
    messages: Vec<Message>,
    notifications: Vec<Notification>,
}

/// 内存持久化网关，四个集合的实现挂在同一个结构上。
///
/// `set_offline(true)` 让所有操作返回存储错误，用来演练降级路径。
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    offline: Arc<AtomicBool>,
    feed: LocalChangeFeed,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_feed(LocalChangeFeed::default())
    }

    pub fn with_feed(feed: LocalChangeFeed) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            offline: Arc::new(AtomicBool::new(false)),
            feed,
        }
    }

    pub fn feed(&self) -> LocalChangeFeed {
        self.feed.clone()
    }

    /// 模拟后端不可达。
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn guard_online(&self) -> RepositoryResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RepositoryError::storage("store offline"));
        }
        Ok(())
    }

    async fn publish(&self, event: FeedEvent) {
        if let Err(error) = self.feed.publish(event).await {
            warn!(%error, "change feed publish failed");
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoomRepository for MemoryStore {
    async fn create_with_owner(
        &self,
        room: ChatRoom,
        owner: Participant,
    ) -> RepositoryResult<ChatRoom> {
        self.guard_online()?;
        {
            // 两行在同一把锁内落地，等价于网关的单事务
            let mut state = self.state.lock().unwrap();
            state.rooms.insert(room.id, room.clone());
            state
                .participants
                .insert((owner.room_id, owner.user_id), owner.clone());
        }
        self.publish(FeedEvent::ParticipantChanged {
            room_id: owner.room_id,
            user_id: owner.user_id,
        })
        .await;
        Ok(room)
    }

    async fn find_by_id(&self, id: RoomId) -> RepositoryResult<Option<ChatRoom>> {
        self.guard_online()?;
        Ok(self.state.lock().unwrap().rooms.get(&id).cloned())
    }

    async fn list_for_user(&self, user_id: UserId) -> RepositoryResult<Vec<ChatRoom>> {
        self.guard_online()?;
        let state = self.state.lock().unwrap();
        let mut rooms: Vec<ChatRoom> = state
            .rooms
            .values()
            .filter(|room| {
                state
                    .participants
                    .get(&(room.id, user_id))
                    .is_some_and(|p| p.is_active)
            })
            .cloned()
            .collect();
        rooms.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(rooms)
    }

    async fn list_direct_for_user(&self, user_id: UserId) -> RepositoryResult<Vec<ChatRoom>> {
        let rooms = self.list_for_user(user_id).await?;
        Ok(rooms.into_iter().filter(|room| room.is_direct()).collect())
    }

    async fn delete(&self, id: RoomId) -> RepositoryResult<()> {
        self.guard_online()?;
        let affected: Vec<UserId> = {
            let mut state = self.state.lock().unwrap();
            state.rooms.remove(&id);
            let affected = state
                .participants
                .values()
                .filter(|p| p.room_id == id && p.is_active)
                .map(|p| p.user_id)
                .collect();
            state.participants.retain(|(room_id, _), _| *room_id != id);
            state.messages.retain(|m| m.room_id != id);
            state.notifications.retain(|n| n.room_id != id);
            affected
        };
        for user_id in affected {
            self.publish(FeedEvent::ParticipantChanged {
                room_id: id,
                user_id,
            })
            .await;
        }
        Ok(())
    }
}

#[async_trait]
impl ParticipantRepository for MemoryStore {
    async fn upsert(&self, participant: Participant) -> RepositoryResult<Participant> {
        self.guard_online()?;
        self.state
            .lock()
            .unwrap()
            .participants
            .insert((participant.room_id, participant.user_id), participant.clone());
        self.publish(FeedEvent::ParticipantChanged {
            room_id: participant.room_id,
            user_id: participant.user_id,
        })
        .await;
        Ok(participant)
    }

    async fn find(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> RepositoryResult<Option<Participant>> {
        self.guard_online()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .participants
            .get(&(room_id, user_id))
            .cloned())
    }

    async fn list_active(&self, room_id: RoomId) -> RepositoryResult<Vec<Participant>> {
        self.guard_online()?;
        let state = self.state.lock().unwrap();
        let mut members: Vec<Participant> = state
            .participants
            .values()
            .filter(|p| p.room_id == room_id && p.is_active)
            .cloned()
            .collect();
        members.sort_by_key(|p| p.joined_at);
        Ok(members)
    }

    async fn count_active(&self, room_id: RoomId) -> RepositoryResult<u32> {
        self.guard_online()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .participants
            .values()
            .filter(|p| p.room_id == room_id && p.is_active)
            .count() as u32)
    }

    async fn deactivate(&self, room_id: RoomId, user_id: UserId) -> RepositoryResult<()> {
        self.guard_online()?;
        {
            let mut state = self.state.lock().unwrap();
            if let Some(participant) = state.participants.get_mut(&(room_id, user_id)) {
                participant.deactivate();
            }
        }
        self.publish(FeedEvent::ParticipantChanged { room_id, user_id })
            .await;
        Ok(())
    }

    async fn set_last_read(
        &self,
        room_id: RoomId,
        user_id: UserId,
        at: Timestamp,
    ) -> RepositoryResult<()> {
        self.guard_online()?;
        let mut state = self.state.lock().unwrap();
        if let Some(participant) = state.participants.get_mut(&(room_id, user_id)) {
            participant.record_read(at);
        }
        Ok(())
    }
}

#[async_trait]
impl MessageRepository for MemoryStore {
    async fn insert(&self, message: Message) -> RepositoryResult<Message> {
        self.guard_online()?;
        self.state.lock().unwrap().messages.push(message.clone());
        self.publish(FeedEvent::MessageInserted(message.clone())).await;
        Ok(message)
    }

    async fn find_by_id(&self, id: MessageId) -> RepositoryResult<Option<Message>> {
        self.guard_online()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .messages
            .iter()
            .find(|m| m.id == id)
            .cloned())
    }

    async fn find_many(&self, ids: &[MessageId]) -> RepositoryResult<Vec<Message>> {
        self.guard_online()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .messages
            .iter()
            .filter(|m| ids.contains(&m.id))
            .cloned()
            .collect())
    }

    async fn update(&self, message: Message) -> RepositoryResult<Message> {
        self.guard_online()?;
        let mut state = self.state.lock().unwrap();
        match state.messages.iter_mut().find(|m| m.id == message.id) {
            Some(slot) => {
                *slot = message.clone();
                Ok(message)
            }
            None => Err(RepositoryError::storage("message row missing on update")),
        }
    }

    async fn list_page(
        &self,
        room_id: RoomId,
        limit: u32,
        before: Option<Timestamp>,
    ) -> RepositoryResult<Vec<Message>> {
        self.guard_online()?;
        let state = self.state.lock().unwrap();
        // 下标即插入顺序，充当同时间戳的单调序列
        let mut page: Vec<(usize, &Message)> = state
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.room_id == room_id)
            .filter(|(_, m)| before.map_or(true, |cutoff| m.created_at < cutoff))
            .collect();
        page.sort_by(|(a_seq, a), (b_seq, b)| {
            (b.created_at, b_seq).cmp(&(a.created_at, a_seq))
        });
        Ok(page
            .into_iter()
            .take(limit as usize)
            .map(|(_, m)| m.clone())
            .collect())
    }
}

#[async_trait]
impl NotificationRepository for MemoryStore {
    async fn insert_many(&self, notifications: Vec<Notification>) -> RepositoryResult<()> {
        self.guard_online()?;
        self.state.lock().unwrap().notifications.extend(notifications);
        Ok(())
    }

    async fn mark_room_read(
        &self,
        user_id: UserId,
        room_id: RoomId,
        at: Timestamp,
    ) -> RepositoryResult<u64> {
        self.guard_online()?;
        let mut state = self.state.lock().unwrap();
        let mut flipped = 0;
        for notification in state
            .notifications
            .iter_mut()
            .filter(|n| n.user_id == user_id && n.room_id == room_id)
        {
            if notification.mark_read(at) {
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    async fn count_unread(&self, user_id: UserId) -> RepositoryResult<HashMap<RoomId, u64>> {
        self.guard_online()?;
        let state = self.state.lock().unwrap();
        let mut counts = HashMap::new();
        for notification in state
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id && !n.is_read)
        {
            *counts.entry(notification.room_id).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
