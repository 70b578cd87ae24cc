use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;
use uuid::Uuid;

/// How often a pass is triggered by the ticker.
pub const PASS_INTERVAL: Duration = Duration::from_secs(300);
/// How often the heartbeat task updates `last_heartbeat`.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// Bounded wait for the current pass to drain during shutdown.
pub const SHUTDOWN_DRAIN: Duration = Duration::from_secs(1);
/// Per-call timeout for story section generation.
pub const STORY_TIMEOUT: Duration = Duration::from_secs(60);
/// Capacity of the AI question streaming channel.
pub const AI_CHANNEL_CAPACITY: usize = 16;
/// Upper bound on the adaptive-candidate freshness probe.
pub const CANDIDATE_PROBE_LIMIT: i64 = 50;
/// Exponential backoff cap, in seconds.
pub const BACKOFF_CAP_SECS: u64 = 3600;
/// How many recent question summaries are sent to the AI to reduce repetition.
pub const RECENT_SUMMARY_LIMIT: i64 = 10;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub worker: WorkerSettings,
    pub email: EmailSettings,
    pub smtp: SmtpSettings,
    pub expo_access_token: Option<String>,
    /// Server-level fallback API keys, used when a user has no stored key.
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    /// Assert global pause on startup ("quiet boot").
    pub worker_start_paused: bool,
    /// Enables the viewed-latest-section filter for story generation.
    pub story_engagement_gate: bool,
}

/// Worker loop tunables
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Replica identity; one worker_status row per instance.
    pub instance: String,
    /// Run-history ring capacity.
    pub max_history: usize,
    /// Activity-log ring capacity.
    pub max_activity_logs: usize,
    /// Eligible-count below which a refill is triggered.
    pub question_refill_threshold: i64,
    /// Base daily-assignment horizon, raised to `daily_repeat_avoid_days` if smaller.
    pub daily_horizon_days: i64,
    /// Repeat-avoid window that also bounds the horizon.
    pub daily_repeat_avoid_days: i64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            instance: format!("worker-{}", Uuid::new_v4()),
            max_history: 100,
            max_activity_logs: 200,
            question_refill_threshold: 10,
            daily_horizon_days: 2,
            daily_repeat_avoid_days: 7,
        }
    }
}

impl WorkerSettings {
    /// Effective daily-assignment horizon.
    ///
    /// If assignments for future dates are removed elsewhere (after a user
    /// correctly answers a repeat), the next pass must backfill the entire
    /// avoid window, so the horizon can never be shorter than it.
    pub fn effective_horizon(&self) -> i64 {
        self.daily_horizon_days.max(self.daily_repeat_avoid_days)
    }
}

/// Notification dispatch settings
#[derive(Debug, Clone)]
pub struct EmailSettings {
    /// Master switch for daily reminder dispatch.
    pub daily_reminder_enabled: bool,
    /// Local hour at which reminders may fire per user.
    pub daily_reminder_hour: u32,
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            daily_reminder_enabled: false,
            daily_reminder_hour: 9,
        }
    }
}

/// SMTP transport settings (lettre)
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_address: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let worker = WorkerSettings {
            instance: env::var("WORKER_INSTANCE")
                .unwrap_or_else(|_| format!("worker-{}", Uuid::new_v4())),
            max_history: parse_env("WORKER_MAX_HISTORY", 100)?,
            max_activity_logs: parse_env("WORKER_MAX_ACTIVITY_LOGS", 200)?,
            question_refill_threshold: parse_env("QUESTION_REFILL_THRESHOLD", 10)?,
            daily_horizon_days: parse_env("DAILY_HORIZON_DAYS", 2)?,
            daily_repeat_avoid_days: parse_env("DAILY_REPEAT_AVOID_DAYS", 7)?,
        };

        let email = EmailSettings {
            daily_reminder_enabled: parse_bool("DAILY_REMINDER_ENABLED", false)?,
            daily_reminder_hour: parse_env("DAILY_REMINDER_HOUR", 9)?,
        };

        let smtp = SmtpSettings {
            host: env::var("SMTP_HOST").ok(),
            port: parse_env("SMTP_PORT", 587)?,
            username: env::var("SMTP_USERNAME").ok(),
            password: env::var("SMTP_PASSWORD").ok(),
            from_address: env::var("SMTP_FROM")
                .unwrap_or_else(|_| "noreply@localhost".to_string()),
        };

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            worker,
            email,
            smtp,
            expo_access_token: env::var("EXPO_ACCESS_TOKEN").ok(),
            openai_api_key: env::var("OPENAI_API_KEY").ok(),
            anthropic_api_key: env::var("ANTHROPIC_API_KEY").ok(),
            worker_start_paused: parse_bool("WORKER_START_PAUSED", false)?,
            story_engagement_gate: parse_bool("STORY_ENGAGEMENT_GATE", false)?,
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{} must be a valid number", key)),
        Err(_) => Ok(default),
    }
}

fn parse_bool(key: &str, default: bool) -> Result<bool> {
    match env::var(key) {
        Ok(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" | "" => Ok(false),
            other => anyhow::bail!("{} must be a boolean, got {:?}", key, other),
        },
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_horizon_floors_at_avoid_window() {
        let mut settings = WorkerSettings::default();
        settings.daily_horizon_days = 1;
        settings.daily_repeat_avoid_days = 7;
        assert_eq!(settings.effective_horizon(), 7);

        settings.daily_horizon_days = 14;
        assert_eq!(settings.effective_horizon(), 14);
    }

    #[test]
    fn defaults() {
        let settings = WorkerSettings::default();
        assert_eq!(settings.max_history, 100);
        assert_eq!(settings.question_refill_threshold, 10);
        assert!(settings.instance.starts_with("worker-"));

        let email = EmailSettings::default();
        assert!(!email.daily_reminder_enabled);
        assert_eq!(email.daily_reminder_hour, 9);
    }
}
