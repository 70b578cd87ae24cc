use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::kernel::{BaseStoryAI, UserAiConfig};

use super::models::{Story, StorySection};

/// Story generation failure modes the worker branches on.
#[derive(Debug, thiserror::Error)]
pub enum StoryError {
    /// The per-story daily generation cap was hit. Expected during normal
    /// operation; not a failure.
    #[error("daily story generation limit reached")]
    LimitReached,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Story operations the story stage consumes. Eligibility rules (active
/// status, pause flag, daily cap) live here, not in the worker.
#[async_trait]
pub trait StoryService: Send + Sync {
    async fn active_story(&self, user_id: Uuid) -> Result<Option<Story>>;

    /// Whether the most recent section has been viewed. Consulted only when
    /// the engagement gate is enabled.
    async fn latest_section_viewed(&self, story_id: Uuid) -> Result<bool>;

    /// Generate and persist the next section of a story.
    async fn generate_section(
        &self,
        story_id: Uuid,
        user_id: Uuid,
        ai_config: &UserAiConfig,
    ) -> Result<StorySection, StoryError>;
}

/// Postgres-backed story service driving a narrative AI capability.
pub struct PgStoryService {
    pool: PgPool,
    ai: Arc<dyn BaseStoryAI>,
    /// Sections allowed per story per UTC day.
    daily_limit: i64,
}

impl PgStoryService {
    pub fn new(pool: PgPool, ai: Arc<dyn BaseStoryAI>) -> Self {
        Self {
            pool,
            ai,
            daily_limit: 1,
        }
    }
}

#[async_trait]
impl StoryService for PgStoryService {
    async fn active_story(&self, user_id: Uuid) -> Result<Option<Story>> {
        Story::find_active_for_user(user_id, &self.pool).await
    }

    async fn latest_section_viewed(&self, story_id: Uuid) -> Result<bool> {
        Ok(StorySection::find_latest(story_id, &self.pool)
            .await?
            .map(|s| s.viewed_at.is_some())
            // No sections yet: nothing to have viewed, generation may proceed.
            .unwrap_or(true))
    }

    async fn generate_section(
        &self,
        story_id: Uuid,
        user_id: Uuid,
        ai_config: &UserAiConfig,
    ) -> Result<StorySection, StoryError> {
        let story = Story::find_active_for_user(user_id, &self.pool)
            .await?
            .filter(|s| s.id == story_id)
            .ok_or_else(|| anyhow::anyhow!("story {} is not active for user", story_id))?;

        let utc_midnight = Utc::now()
            .date_naive()
            .and_time(chrono::NaiveTime::MIN)
            .and_utc();
        let today_count =
            StorySection::count_created_since(story_id, utc_midnight, &self.pool).await?;
        if today_count >= self.daily_limit {
            return Err(StoryError::LimitReached);
        }

        let previous = StorySection::find_recent(story_id, 3, &self.pool).await?;
        let content = self.ai.continue_story(ai_config, &story, &previous).await?;

        let section = StorySection::insert_next(story_id, &content, &self.pool).await?;
        debug!(
            story_id = %story_id,
            section = section.section_number,
            "story section generated"
        );
        Ok(section)
    }
}
