use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{ApiKey, DeviceToken, LearningPreferences, User};

/// User lookups the pipeline stages consume.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Every user the worker iterates; stage gates narrow further.
    async fn list_users(&self) -> Result<Vec<User>>;

    async fn learning_preferences(&self, user_id: Uuid) -> Result<Option<LearningPreferences>>;

    /// Stored API key for (user, provider), if any.
    async fn api_key(&self, user_id: Uuid, provider: &str) -> Result<Option<ApiKey>>;

    /// Update an API key's `last_used_at`. Called fire-and-forget.
    async fn touch_api_key(&self, api_key_id: Uuid) -> Result<()>;

    async fn mark_daily_reminder_sent(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Registered push device tokens for a user.
    async fn push_tokens(&self, user_id: Uuid) -> Result<Vec<String>>;
}

/// Postgres-backed user store.
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn list_users(&self) -> Result<Vec<User>> {
        User::find_all(&self.pool).await
    }

    async fn learning_preferences(&self, user_id: Uuid) -> Result<Option<LearningPreferences>> {
        LearningPreferences::find_by_user(user_id, &self.pool).await
    }

    async fn api_key(&self, user_id: Uuid, provider: &str) -> Result<Option<ApiKey>> {
        ApiKey::find_for_provider(user_id, provider, &self.pool).await
    }

    async fn touch_api_key(&self, api_key_id: Uuid) -> Result<()> {
        ApiKey::touch(api_key_id, &self.pool).await
    }

    async fn mark_daily_reminder_sent(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        LearningPreferences::mark_daily_reminder_sent(user_id, at, &self.pool).await
    }

    async fn push_tokens(&self, user_id: Uuid) -> Result<Vec<String>> {
        Ok(DeviceToken::find_by_user(user_id, &self.pool)
            .await?
            .into_iter()
            .map(|d| d.token)
            .collect())
    }
}
