use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// A user's narrative story. At most one story per user has
/// `status = 'active'`.
#[derive(sqlx::FromRow, Debug, Clone)]
pub struct Story {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub language: String,
    pub level: String,
    pub status: String,
    pub auto_generation_paused: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Story {
    pub async fn find_active_for_user(user_id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM stories WHERE user_id = $1 AND status = 'active'",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .map_err(Into::into)
    }
}

/// One section of a story. `section_number` increases monotonically within
/// a story.
#[derive(sqlx::FromRow, Debug, Clone)]
pub struct StorySection {
    pub id: Uuid,
    pub story_id: Uuid,
    pub section_number: i32,
    pub content: String,
    pub viewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl StorySection {
    pub async fn find_latest(story_id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM story_sections
             WHERE story_id = $1
             ORDER BY section_number DESC
             LIMIT 1",
        )
        .bind(story_id)
        .fetch_optional(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn find_recent(story_id: Uuid, limit: i64, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM story_sections
             WHERE story_id = $1
             ORDER BY section_number DESC
             LIMIT $2",
        )
        .bind(story_id)
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn count_created_since(
        story_id: Uuid,
        since: DateTime<Utc>,
        pool: &PgPool,
    ) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM story_sections
             WHERE story_id = $1 AND created_at >= $2",
        )
        .bind(story_id)
        .bind(since)
        .fetch_one(pool)
        .await?;
        Ok(count.0)
    }

    pub async fn insert_next(story_id: Uuid, content: &str, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>(
            "INSERT INTO story_sections (story_id, section_number, content)
             SELECT $1, COALESCE(MAX(section_number), 0) + 1, $2
             FROM story_sections WHERE story_id = $1
             RETURNING *",
        )
        .bind(story_id)
        .bind(content)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }
}
