//! The worker state machine and its per-cycle pipeline.
//!
//! ```text
//! Worker (one instance of N replicas)
//!     │
//!     ├─► run loop: ticker + manual trigger + cancellation
//!     │       └─► pass: pause gate → refill → daily assignments
//!     │                 → stories → notifications → janitor → status write
//!     └─► heartbeat task (independent, never stalled by a pass)
//! ```
//!
//! Replicas coordinate only through storage: pause flags, idempotent daily
//! assignments, the notification ledger, and per-instance status rows.

pub mod backoff;
pub mod error;
mod janitor;
mod lifecycle;
mod notifications;
mod pipeline;
mod refill;
mod scheduler;
pub mod status;
mod stories;

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::{EmailSettings, WorkerSettings};
use crate::domains::control::WorkerStatusRow;
use crate::kernel::WorkerDeps;

pub use error::{RefillError, WorkerError};
pub use status::{ActivityEntry, ActivityLevel, ActivityLog, RunHistory, RunRecord, RunStatus};

use backoff::UserFailures;

/// Server-level fallback AI keys, used when a user has no stored key for
/// their provider.
#[derive(Debug, Clone, Default)]
pub struct ServerAiKeys {
    pub openai: Option<String>,
    pub anthropic: Option<String>,
}

/// One worker replica.
pub struct Worker {
    instance: String,
    settings: WorkerSettings,
    email_settings: EmailSettings,
    story_engagement_gate: bool,
    server_keys: ServerAiKeys,
    deps: WorkerDeps,

    running: AtomicBool,
    /// In-memory mirror of the persisted instance pause flag.
    paused: AtomicBool,
    current_activity: Mutex<String>,

    history: RunHistory,
    activity: ActivityLog,
    failures: UserFailures,
    last_translation_cleanup: Mutex<Option<NaiveDate>>,

    manual_tx: mpsc::Sender<()>,
    manual_rx: Mutex<Option<mpsc::Receiver<()>>>,
    cancel: CancellationToken,

    total_runs: AtomicI64,
    total_questions_generated: AtomicI64,
    last_run_start: Mutex<Option<DateTime<Utc>>>,
    last_run_finish: Mutex<Option<DateTime<Utc>>>,
    last_run_error: Mutex<Option<String>>,
}

impl Worker {
    pub fn new(settings: WorkerSettings, email_settings: EmailSettings, deps: WorkerDeps) -> Self {
        // Capacity 1: a pending manual trigger coalesces further requests.
        let (manual_tx, manual_rx) = mpsc::channel(1);
        Self {
            instance: settings.instance.clone(),
            history: RunHistory::new(settings.max_history),
            activity: ActivityLog::new(settings.max_activity_logs),
            settings,
            email_settings,
            story_engagement_gate: false,
            server_keys: ServerAiKeys::default(),
            deps,
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            current_activity: Mutex::new("Initialized".to_string()),
            failures: UserFailures::default(),
            last_translation_cleanup: Mutex::new(None),
            manual_tx,
            manual_rx: Mutex::new(Some(manual_rx)),
            cancel: CancellationToken::new(),
            total_runs: AtomicI64::new(0),
            total_questions_generated: AtomicI64::new(0),
            last_run_start: Mutex::new(None),
            last_run_finish: Mutex::new(None),
            last_run_error: Mutex::new(None),
        }
    }

    pub fn with_engagement_gate(mut self, enabled: bool) -> Self {
        self.story_engagement_gate = enabled;
        self
    }

    pub fn with_server_keys(mut self, keys: ServerAiKeys) -> Self {
        self.server_keys = keys;
        self
    }

    // =========================================================================
    // Read accessors (all return copies)
    // =========================================================================

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn get_history(&self) -> Vec<RunRecord> {
        self.history.entries()
    }

    pub fn get_activity_logs(&self) -> Vec<ActivityEntry> {
        self.activity.entries()
    }

    pub fn get_status(&self) -> WorkerStatusRow {
        WorkerStatusRow {
            worker_instance: self.instance.clone(),
            is_running: self.running.load(Ordering::SeqCst),
            is_paused: self.paused.load(Ordering::SeqCst),
            current_activity: self.current_activity(),
            last_heartbeat: Some(Utc::now()),
            last_run_start: *lock_ignore_poison(&self.last_run_start),
            last_run_finish: *lock_ignore_poison(&self.last_run_finish),
            last_run_error: lock_ignore_poison(&self.last_run_error).clone(),
            total_runs: self.total_runs.load(Ordering::SeqCst),
            total_questions_generated: self.total_questions_generated.load(Ordering::SeqCst),
        }
    }

    pub(crate) fn current_activity(&self) -> String {
        lock_ignore_poison(&self.current_activity).clone()
    }

    pub(crate) fn set_activity(&self, activity: impl Into<String>) {
        *lock_ignore_poison(&self.current_activity) = activity.into();
    }
}

pub(crate) fn lock_ignore_poison<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
