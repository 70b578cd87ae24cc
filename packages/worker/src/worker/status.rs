//! In-memory run history and activity log.
//!
//! Both are bounded rings guarded by a mutex; accessors return copies so
//! callers never alias the live buffers.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Failure,
}

/// One completed (or skipped) pass.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub start: DateTime<Utc>,
    pub finish: DateTime<Utc>,
    pub duration_ms: i64,
    pub status: RunStatus,
    /// Human-readable summary of per-user actions and error causes.
    pub details: String,
}

/// Bounded ring of recent pass records.
pub struct RunHistory {
    entries: Mutex<VecDeque<RunRecord>>,
    capacity: usize,
}

impl RunHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<RunRecord>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, record: RunRecord) {
        let mut entries = self.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(record);
    }

    /// Most recent entries, oldest first (copy).
    pub fn entries(&self) -> Vec<RunRecord> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone)]
pub struct ActivityEntry {
    pub timestamp: DateTime<Utc>,
    pub level: ActivityLevel,
    pub message: String,
    pub user_id: Option<Uuid>,
    pub username: Option<String>,
}

/// Bounded ring of structured activity entries.
pub struct ActivityLog {
    entries: Mutex<VecDeque<ActivityEntry>>,
    capacity: usize,
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<ActivityEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(
        &self,
        level: ActivityLevel,
        message: impl Into<String>,
        user_id: Option<Uuid>,
        username: Option<&str>,
    ) {
        let mut entries = self.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(ActivityEntry {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            user_id,
            username: username.map(str::to_string),
        });
    }

    pub fn entries(&self) -> Vec<ActivityEntry> {
        self.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Summarize a pass's errors: the first three causes plus a count of the
/// rest, bounded so run details stay readable.
pub fn summarize_errors(errors: &[String]) -> String {
    const SHOWN: usize = 3;
    if errors.is_empty() {
        return String::new();
    }
    let shown: Vec<&str> = errors.iter().take(SHOWN).map(String::as_str).collect();
    if errors.len() > SHOWN {
        format!("{} (+{} more)", shown.join("; "), errors.len() - SHOWN)
    } else {
        shown.join("; ")
    }
}
