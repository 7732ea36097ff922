//! 用户资料适配器。
//!
//! 资料维护属于外部服务，本子系统只做批量查询。查不到的 id
//! 从结果缺席，调用方按未解析渲染。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use application::identity::{ProfileError, ProfileResolver, UserProfile};
use async_trait::async_trait;
use domain::UserId;
use sqlx::PgPool;
use uuid::Uuid;

/// 从 user_profiles 表批量读取。
#[derive(Clone)]
pub struct PgProfileResolver {
    pool: PgPool,
}

impl PgProfileResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileResolver for PgProfileResolver {
    async fn resolve_profiles(
        &self,
        ids: &[UserId],
    ) -> Result<HashMap<UserId, UserProfile>, ProfileError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let ids: Vec<Uuid> = ids.iter().copied().map(Uuid::from).collect();
        let rows: Vec<(Uuid, String, Option<String>)> = sqlx::query_as(
            r#"SELECT user_id, display_name, avatar_url FROM user_profiles WHERE user_id = ANY($1)"#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|err| ProfileError::lookup(err.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(user_id, display_name, avatar_url)| {
                (
                    UserId::from(user_id),
                    UserProfile {
                        display_name,
                        avatar_url,
                    },
                )
            })
            .collect())
    }
}

/// 内存资料表，测试与单机演示用。
#[derive(Clone, Default)]
pub struct StaticProfileResolver {
    profiles: Arc<Mutex<HashMap<UserId, UserProfile>>>,
}

impl StaticProfileResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user_id: UserId, display_name: impl Into<String>) {
        self.profiles.lock().unwrap().insert(
            user_id,
            UserProfile {
                display_name: display_name.into(),
                avatar_url: None,
            },
        );
    }
}

#[async_trait]
impl ProfileResolver for StaticProfileResolver {
    async fn resolve_profiles(
        &self,
        ids: &[UserId],
    ) -> Result<HashMap<UserId, UserProfile>, ProfileError> {
        let profiles = self.profiles.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| profiles.get(id).map(|profile| (*id, profile.clone())))
            .collect())
    }
}
