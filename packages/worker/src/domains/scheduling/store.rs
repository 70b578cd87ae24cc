use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

/// Daily-assignment capability the scheduler stage consumes.
///
/// `ensure_assignments` is contractually idempotent: calling it twice for
/// the same (user, date) must not create duplicate rows.
#[async_trait]
pub trait DailyScheduler: Send + Sync {
    async fn ensure_assignments(&self, user_id: Uuid, date: NaiveDate) -> Result<()>;
}

/// Postgres-backed daily scheduler.
///
/// Picks a day's worth of questions from the user's pool, skipping
/// questions already assigned inside the repeat-avoid window, and inserts
/// under the (user, date, question) uniqueness constraint.
pub struct PgDailyScheduler {
    pool: PgPool,
    avoid_days: i64,
    default_daily_goal: i64,
}

impl PgDailyScheduler {
    pub fn new(pool: PgPool, avoid_days: i64) -> Self {
        Self {
            pool,
            avoid_days,
            default_daily_goal: 10,
        }
    }
}

#[async_trait]
impl DailyScheduler for PgDailyScheduler {
    async fn ensure_assignments(&self, user_id: Uuid, date: NaiveDate) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Already provisioned for this date: nothing to do. Replicas racing
        // here is fine; the unique index deduplicates the insert below.
        let existing: Option<super::models::DailyAssignment> = sqlx::query_as(
            "SELECT * FROM daily_assignments
             WHERE user_id = $1 AND assignment_date = $2
             LIMIT 1",
        )
        .bind(user_id)
        .bind(date)
        .fetch_optional(&mut *tx)
        .await?;

        if existing.is_some() {
            tx.rollback().await?;
            return Ok(());
        }

        let goal: Option<(i32,)> = sqlx::query_as(
            "SELECT daily_goal FROM learning_preferences WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;
        let goal = goal
            .map(|(g,)| g as i64)
            .filter(|g| *g > 0)
            .unwrap_or(self.default_daily_goal);

        sqlx::query(
            "INSERT INTO daily_assignments (user_id, assignment_date, question_id)
             SELECT $1, $2, q.id
             FROM questions q
             JOIN user_question_assignments uqa
               ON uqa.question_id = q.id AND uqa.user_id = $1
             JOIN users u ON u.id = $1
             WHERE q.status = 'active'
               AND q.language = u.preferred_language
               AND q.level = u.current_level
               AND NOT EXISTS (
                   SELECT 1 FROM daily_assignments da
                   WHERE da.user_id = $1
                     AND da.question_id = q.id
                     AND da.assignment_date > $2 - $3::int
                     AND da.assignment_date <= $2
               )
             ORDER BY q.created_at DESC
             LIMIT $4
             ON CONFLICT (user_id, assignment_date, question_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(date)
        .bind(self.avoid_days as i32)
        .bind(goal)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
