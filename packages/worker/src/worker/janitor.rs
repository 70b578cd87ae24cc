//! Translation cache janitor.
//!
//! Sweeps expired cache entries at most once per UTC calendar day per
//! instance. Failures are logged and reported in the run detail; other
//! stages are unaffected.

use chrono::{DateTime, Utc};
use tracing::{error, info};

use super::{lock_ignore_poison, Worker};

/// Returns an error summary when the sweep fails, None otherwise (including
/// when the sweep already ran today).
pub(crate) async fn run_janitor_stage(worker: &Worker, now: DateTime<Utc>) -> Option<String> {
    let today = now.date_naive();
    {
        let last = lock_ignore_poison(&worker.last_translation_cleanup);
        if *last == Some(today) {
            return None;
        }
    }

    // Mark the attempt first: at most one sweep per day, even a failed one.
    *lock_ignore_poison(&worker.last_translation_cleanup) = Some(today);

    match worker.deps.translations.delete_expired(now).await {
        Ok(deleted) => {
            info!(deleted, "translation cache sweep complete");
            None
        }
        Err(e) => {
            error!(error = %e, "translation cache sweep failed");
            Some(format!("translation cache sweep failed: {}", e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmailSettings, WorkerSettings};
    use crate::kernel::test_dependencies::TestDeps;
    use chrono::Duration;

    fn worker_with(mocks: &TestDeps) -> Worker {
        Worker::new(
            WorkerSettings {
                instance: "worker-test".into(),
                ..WorkerSettings::default()
            },
            EmailSettings::default(),
            mocks.deps(),
        )
    }

    #[tokio::test]
    async fn sweeps_at_most_once_per_utc_day() {
        let mocks = TestDeps::default();
        *mocks.translations.expired.lock().unwrap() = 4;
        let worker = worker_with(&mocks);

        let now: DateTime<Utc> = "2025-01-15T01:00:00Z".parse().unwrap();
        assert!(run_janitor_stage(&worker, now).await.is_none());
        assert!(run_janitor_stage(&worker, now + Duration::hours(5)).await.is_none());
        assert_eq!(*mocks.translations.delete_calls.lock().unwrap(), 1);

        // New UTC day: sweep again.
        run_janitor_stage(&worker, now + Duration::days(1)).await;
        assert_eq!(*mocks.translations.delete_calls.lock().unwrap(), 2);
    }
}
