//! Persisted notification log.
//!
//! The ledger is the cross-instance once-per-day idempotency contract for
//! notification dispatch: before sending, a dispatcher asks whether a row
//! already exists inside the UTC image of the user-local day. No distributed
//! locks; correctness relies on the atomic row insert.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "notification_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    DailyReminder,
    WordOfDay,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "notification_channel", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Email,
    Push,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "notification_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Sent,
    Failed,
    /// Some device tokens succeeded, some failed.
    Partial,
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct SentNotification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub notification_type: NotificationType,
    pub channel: NotificationChannel,
    pub status: NotificationStatus,
    pub error_message: Option<String>,
    pub sent_at: DateTime<Utc>,
}

/// Ledger operations the notification dispatchers consume.
#[async_trait]
pub trait NotificationLedger: Send + Sync {
    /// Whether a `sent` or `partial` row exists in the window.
    async fn delivered_in_window(
        &self,
        user_id: Uuid,
        notification_type: NotificationType,
        channel: NotificationChannel,
        window: (DateTime<Utc>, DateTime<Utc>),
    ) -> Result<bool>;

    async fn record(
        &self,
        user_id: Uuid,
        notification_type: NotificationType,
        channel: NotificationChannel,
        status: NotificationStatus,
        error_message: Option<&str>,
    ) -> Result<()>;
}

pub struct PgNotificationLedger {
    pool: PgPool,
}

impl PgNotificationLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationLedger for PgNotificationLedger {
    async fn delivered_in_window(
        &self,
        user_id: Uuid,
        notification_type: NotificationType,
        channel: NotificationChannel,
        window: (DateTime<Utc>, DateTime<Utc>),
    ) -> Result<bool> {
        let (start, end) = window;
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sent_notifications
             WHERE user_id = $1
               AND notification_type = $2
               AND channel = $3
               AND status IN ('sent', 'partial')
               AND sent_at >= $4 AND sent_at < $5",
        )
        .bind(user_id)
        .bind(notification_type)
        .bind(channel)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.0 > 0)
    }

    async fn record(
        &self,
        user_id: Uuid,
        notification_type: NotificationType,
        channel: NotificationChannel,
        status: NotificationStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO sent_notifications
                 (user_id, notification_type, channel, status, error_message)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(user_id)
        .bind(notification_type)
        .bind(channel)
        .bind(status)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
