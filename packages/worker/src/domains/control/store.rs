//! Operator controls and replica status.
//!
//! Pause flags and status rows are the only cross-instance coordination the
//! worker has: the global pause lives in a settings row every replica reads
//! each cycle, and each replica upserts its own worker_status row keyed by
//! instance name.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// Per-instance status row, one per replica.
#[derive(sqlx::FromRow, Debug, Clone, Default)]
pub struct WorkerStatusRow {
    pub worker_instance: String,
    pub is_running: bool,
    pub is_paused: bool,
    pub current_activity: String,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_run_start: Option<DateTime<Utc>>,
    pub last_run_finish: Option<DateTime<Utc>>,
    pub last_run_error: Option<String>,
    pub total_runs: i64,
    pub total_questions_generated: i64,
}

/// Pause flags and status persistence consumed by the pass gate, the
/// lifecycle, and the heartbeat task.
#[async_trait]
pub trait ControlStore: Send + Sync {
    async fn global_pause(&self) -> Result<bool>;
    async fn set_global_pause(&self, paused: bool) -> Result<()>;

    async fn instance_paused(&self, instance: &str) -> Result<bool>;
    async fn set_instance_paused(&self, instance: &str, paused: bool) -> Result<()>;

    /// Write the full status row for this instance.
    async fn upsert_status(&self, row: &WorkerStatusRow) -> Result<()>;

    /// Update only `last_heartbeat`, leaving the rest of the row alone.
    async fn heartbeat(&self, instance: &str, at: DateTime<Utc>) -> Result<()>;
}

pub struct PgControlStore {
    pool: PgPool,
}

impl PgControlStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ControlStore for PgControlStore {
    async fn global_pause(&self) -> Result<bool> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT value FROM worker_settings WHERE key = 'global_pause'",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(matches!(row.as_ref().map(|(v,)| v.as_str()), Some("true")))
    }

    async fn set_global_pause(&self, paused: bool) -> Result<()> {
        sqlx::query(
            "INSERT INTO worker_settings (key, value)
             VALUES ('global_pause', $1)
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
        )
        .bind(if paused { "true" } else { "false" })
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn instance_paused(&self, instance: &str) -> Result<bool> {
        let row: Option<(bool,)> = sqlx::query_as(
            "SELECT is_paused FROM worker_status WHERE worker_instance = $1",
        )
        .bind(instance)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(p,)| p).unwrap_or(false))
    }

    async fn set_instance_paused(&self, instance: &str, paused: bool) -> Result<()> {
        sqlx::query(
            "INSERT INTO worker_status (worker_instance, is_paused)
             VALUES ($1, $2)
             ON CONFLICT (worker_instance) DO UPDATE SET is_paused = EXCLUDED.is_paused",
        )
        .bind(instance)
        .bind(paused)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_status(&self, row: &WorkerStatusRow) -> Result<()> {
        sqlx::query(
            "INSERT INTO worker_status (
                 worker_instance, is_running, is_paused, current_activity,
                 last_heartbeat, last_run_start, last_run_finish, last_run_error,
                 total_runs, total_questions_generated
             )
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (worker_instance) DO UPDATE SET
                 is_running = EXCLUDED.is_running,
                 is_paused = EXCLUDED.is_paused,
                 current_activity = EXCLUDED.current_activity,
                 last_heartbeat = EXCLUDED.last_heartbeat,
                 last_run_start = EXCLUDED.last_run_start,
                 last_run_finish = EXCLUDED.last_run_finish,
                 last_run_error = EXCLUDED.last_run_error,
                 total_runs = EXCLUDED.total_runs,
                 total_questions_generated = EXCLUDED.total_questions_generated",
        )
        .bind(&row.worker_instance)
        .bind(row.is_running)
        .bind(row.is_paused)
        .bind(&row.current_activity)
        .bind(row.last_heartbeat)
        .bind(row.last_run_start)
        .bind(row.last_run_finish)
        .bind(&row.last_run_error)
        .bind(row.total_runs)
        .bind(row.total_questions_generated)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn heartbeat(&self, instance: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "INSERT INTO worker_status (worker_instance, last_heartbeat)
             VALUES ($1, $2)
             ON CONFLICT (worker_instance) DO UPDATE SET last_heartbeat = EXCLUDED.last_heartbeat",
        )
        .bind(instance)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
