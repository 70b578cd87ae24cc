use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct TranslationCacheEntry {
    pub id: Uuid,
    pub source_text: String,
    pub source_language: String,
    pub target_language: String,
    pub translation: String,
    pub hit_count: i64,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Translation-cache operations consumed by the janitor stage and the
/// word-of-day dispatcher.
#[async_trait]
pub trait TranslationCache: Send + Sync {
    async fn lookup(
        &self,
        source_text: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<Option<TranslationCacheEntry>>;

    /// Increment a cache entry's hit counter. Called fire-and-forget.
    async fn bump_hits(&self, id: Uuid) -> Result<()>;

    /// Delete entries whose `expires_at` has passed. Returns the count.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

pub struct PgTranslationCache {
    pool: PgPool,
}

impl PgTranslationCache {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TranslationCache for PgTranslationCache {
    async fn lookup(
        &self,
        source_text: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<Option<TranslationCacheEntry>> {
        sqlx::query_as::<_, TranslationCacheEntry>(
            "SELECT * FROM translation_cache
             WHERE source_text = $1
               AND source_language = $2
               AND target_language = $3
               AND expires_at > now()",
        )
        .bind(source_text)
        .bind(source_language)
        .bind(target_language)
        .fetch_optional(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn bump_hits(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE translation_cache SET hit_count = hit_count + 1 WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM translation_cache WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
