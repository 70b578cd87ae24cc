use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

/// One question assigned to a user for one calendar date in the user's
/// timezone. Unique on (user_id, assignment_date, question_id); the
/// uniqueness constraint is what makes cross-replica assignment idempotent.
#[derive(sqlx::FromRow, Debug, Clone)]
pub struct DailyAssignment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub assignment_date: NaiveDate,
    pub question_id: Uuid,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}
