use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// User model - SQL persistence layer
///
/// Mutated by the external user service; read-only to the worker.
#[derive(sqlx::FromRow, Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: Option<String>,

    // Learning profile
    pub preferred_language: String,
    pub current_level: String,
    /// IANA timezone name; empty means UTC.
    pub timezone: String,

    // AI settings
    pub ai_enabled: bool,
    pub ai_provider: String,
    pub ai_model: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Find all users the worker considers at all; per-stage gates narrow
    /// further (AI eligibility, pause flags, backoff).
    pub async fn find_all(pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM users ORDER BY created_at")
            .fetch_all(pool)
            .await
            .map_err(Into::into)
    }

    /// Whether this user can be sent to an AI provider at all.
    pub fn has_ai_identity(&self) -> bool {
        self.ai_enabled && !self.preferred_language.is_empty() && !self.current_level.is_empty()
    }
}

/// Per-(user, provider) API key. The id doubles as the usage-tracking handle.
#[derive(sqlx::FromRow, Debug, Clone)]
pub struct ApiKey {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    pub key: String,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ApiKey {
    pub async fn find_for_provider(
        user_id: Uuid,
        provider: &str,
        pool: &PgPool,
    ) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM api_keys WHERE user_id = $1 AND provider = $2",
        )
        .bind(user_id)
        .bind(provider)
        .fetch_optional(pool)
        .await
        .map_err(Into::into)
    }

    /// Update `last_used_at`. Callers run this fire-and-forget.
    pub async fn touch(id: Uuid, pool: &PgPool) -> Result<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = now() WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }
}

/// Per-user learning preferences, including notification switches and the
/// per-user AI pause flag.
#[derive(sqlx::FromRow, Debug, Clone)]
pub struct LearningPreferences {
    pub user_id: Uuid,
    pub focus_on_weak_areas: bool,
    /// Share of eligible questions that should be previously unanswered.
    /// Non-positive values are treated as unset.
    pub fresh_question_ratio: f64,
    pub daily_goal: i32,
    pub ai_paused: bool,
    pub daily_reminder_enabled: bool,
    pub word_of_day_enabled: bool,
    pub push_notifications_enabled: bool,
    pub last_daily_reminder_sent: Option<DateTime<Utc>>,
}

/// Default freshness ratio applied when preferences are missing or unset.
pub const DEFAULT_FRESH_QUESTION_RATIO: f64 = 0.7;

impl LearningPreferences {
    pub async fn find_by_user(user_id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM learning_preferences WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn mark_daily_reminder_sent(
        user_id: Uuid,
        at: DateTime<Utc>,
        pool: &PgPool,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE learning_preferences SET last_daily_reminder_sent = $2 WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(at)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// The freshness ratio with the default applied.
    pub fn effective_fresh_ratio(&self) -> f64 {
        if self.fresh_question_ratio > 0.0 {
            self.fresh_question_ratio
        } else {
            DEFAULT_FRESH_QUESTION_RATIO
        }
    }
}

/// Registered push device token.
#[derive(sqlx::FromRow, Debug, Clone)]
pub struct DeviceToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token: String,
    pub created_at: DateTime<Utc>,
}

impl DeviceToken {
    pub async fn find_by_user(user_id: Uuid, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM device_tokens WHERE user_id = $1 ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefs() -> LearningPreferences {
        LearningPreferences {
            user_id: Uuid::new_v4(),
            focus_on_weak_areas: false,
            fresh_question_ratio: 0.0,
            daily_goal: 10,
            ai_paused: false,
            daily_reminder_enabled: true,
            word_of_day_enabled: true,
            push_notifications_enabled: false,
            last_daily_reminder_sent: None,
        }
    }

    #[test]
    fn fresh_ratio_defaults_when_unset() {
        let mut p = prefs();
        assert_eq!(p.effective_fresh_ratio(), DEFAULT_FRESH_QUESTION_RATIO);

        p.fresh_question_ratio = -1.0;
        assert_eq!(p.effective_fresh_ratio(), DEFAULT_FRESH_QUESTION_RATIO);

        p.fresh_question_ratio = 0.6;
        assert_eq!(p.effective_fresh_ratio(), 0.6);
    }
}
