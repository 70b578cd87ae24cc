//! Generation hints: advisory pressure signals set by external surfaces
//! (e.g. a user burning through a type faster than the refill threshold
//! notices). An active hint promotes its question type to the front of the
//! per-user processing order and forces generation on the next cycle.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::common::QuestionType;

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct GenerationHint {
    pub id: Uuid,
    pub user_id: Uuid,
    pub language: String,
    pub level: String,
    pub question_type: QuestionType,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl GenerationHint {
    pub async fn find_active(
        user_id: Uuid,
        now: DateTime<Utc>,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM generation_hints
             WHERE user_id = $1 AND expires_at > $2
             ORDER BY created_at",
        )
        .bind(user_id)
        .bind(now)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn clear(
        user_id: Uuid,
        language: &str,
        level: &str,
        question_type: QuestionType,
        pool: &PgPool,
    ) -> Result<()> {
        sqlx::query(
            "DELETE FROM generation_hints
             WHERE user_id = $1 AND language = $2 AND level = $3 AND question_type = $4",
        )
        .bind(user_id)
        .bind(language)
        .bind(level)
        .bind(question_type)
        .execute(pool)
        .await?;
        Ok(())
    }
}

/// Hint lookups the refill engine consumes.
#[async_trait]
pub trait HintStore: Send + Sync {
    async fn active_hints(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<GenerationHint>>;

    /// Remove a satisfied hint after a successful generation.
    async fn clear_hint(
        &self,
        user_id: Uuid,
        language: &str,
        level: &str,
        question_type: QuestionType,
    ) -> Result<()>;
}

pub struct PgHintStore {
    pool: PgPool,
}

impl PgHintStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HintStore for PgHintStore {
    async fn active_hints(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<GenerationHint>> {
        GenerationHint::find_active(user_id, now, &self.pool).await
    }

    async fn clear_hint(
        &self,
        user_id: Uuid,
        language: &str,
        level: &str,
        question_type: QuestionType,
    ) -> Result<()> {
        GenerationHint::clear(user_id, language, level, question_type, &self.pool).await
    }
}
