//! 基础设施层实现。
//!
//! 提供持久化网关的 PostgreSQL 与内存实现、Redis 变更推送、
//! 资料与身份适配器，以及后端不可用时的降级装饰器。

pub mod fallback;
pub mod feed;
pub mod identity;
pub mod memory;
pub mod migrations;
pub mod profile;
pub mod repository;

pub use fallback::{
    fallback_messages, fallback_rooms, FallbackMessageRepository, FallbackNotificationRepository,
    FallbackParticipantRepository, FallbackRoomRepository, FALLBACK_DATASET_VERSION,
};
pub use feed::{RedisChangeFeed, RedisFeedPublisher};
pub use identity::FixedIdentity;
pub use memory::{LocalChangeFeed, MemoryStore};
pub use migrations::MIGRATOR;
pub use profile::{PgProfileResolver, StaticProfileResolver};
pub use repository::{
    create_pg_pool, PgMessageRepository, PgNotificationRepository, PgParticipantRepository,
    PgRoomRepository,
};
