//! One pass through the pipeline.
//!
//! Pause gate → question refill → daily assignments → story generation →
//! notifications → translation janitor → status write. Stages are
//! independent: a failure in one is logged, folded into the aggregated run
//! detail, and never aborts the stages after it.

use std::sync::atomic::Ordering;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::status::{summarize_errors, ActivityLevel, RunRecord, RunStatus};
use super::{lock_ignore_poison, Worker};

impl Worker {
    /// Run one pass. Never returns an error: every failure mode ends up in
    /// the run history, the activity log, and the status row instead.
    pub(crate) async fn run_pass(&self, cancel: &CancellationToken) {
        let start = Utc::now();
        *lock_ignore_poison(&self.last_run_start) = Some(start);

        // Per-pass precondition: global pause, then instance pause. A failed
        // pause lookup conservatively suppresses the pass.
        match self.deps.control.global_pause().await {
            Err(e) => {
                warn!(error = %e, "global pause lookup failed, suppressing pass");
                self.finish_skipped_pass(start, "Pause check failed", RunStatus::Failure)
                    .await;
                return;
            }
            Ok(true) => {
                self.finish_skipped_pass(start, "Globally paused", RunStatus::Success)
                    .await;
                return;
            }
            Ok(false) => {}
        }

        let instance_paused = match self.deps.control.instance_paused(&self.instance).await {
            Ok(paused) => paused,
            Err(e) => {
                warn!(error = %e, "instance pause lookup failed, suppressing pass");
                self.finish_skipped_pass(start, "Pause check failed", RunStatus::Failure)
                    .await;
                return;
            }
        };
        if instance_paused || self.is_paused() {
            self.finish_skipped_pass(start, "Paused", RunStatus::Success)
                .await;
            return;
        }

        info!(instance = %self.instance, "pass starting");
        let mut errors: Vec<String> = Vec::new();
        let mut details: Vec<String> = Vec::new();

        let users = match self.deps.users.list_users().await {
            Ok(users) => users,
            Err(e) => {
                // Nothing downstream can run without the user list.
                error!(error = %e, "user lookup failed, aborting pass");
                self.finish_pass(start, vec![format!("user lookup failed: {}", e)], details)
                    .await;
                return;
            }
        };

        // Stage 1: question refill
        let refill = super::refill::run_refill_stage(self, &users, cancel).await;
        self.total_questions_generated
            .fetch_add(refill.questions_generated, Ordering::SeqCst);
        if refill.questions_generated > 0 {
            details.push(format!("generated {} questions", refill.questions_generated));
        }
        errors.extend(refill.errors);

        // Stage 2: daily assignments
        if !cancel.is_cancelled() {
            let schedule = super::scheduler::run_assignment_stage(self, &users, cancel).await;
            if schedule.assigned > 0 || schedule.failed > 0 {
                details.push(format!(
                    "daily assignments: {} ok, {} failed",
                    schedule.assigned, schedule.failed
                ));
            }
            errors.extend(schedule.errors);
        }

        // Stage 3: story sections
        if !cancel.is_cancelled() {
            let stories = super::stories::run_story_stage(self, &users, cancel).await;
            if stories.generated > 0 {
                details.push(format!("generated {} story sections", stories.generated));
            }
            errors.extend(stories.errors);
        }

        // Stage 4: notifications
        if !cancel.is_cancelled() {
            let notify =
                super::notifications::run_notification_stage(self, &users, Utc::now(), cancel)
                    .await;
            if notify.sent + notify.failed + notify.ios_sent + notify.ios_failed > 0 {
                details.push(format!(
                    "notifications: {} sent, {} failed, ios {} sent, {} failed",
                    notify.sent, notify.failed, notify.ios_sent, notify.ios_failed
                ));
            }
            errors.extend(notify.errors);
        }

        // Stage 5: translation cache janitor
        if !cancel.is_cancelled() {
            if let Some(e) = super::janitor::run_janitor_stage(self, Utc::now()).await {
                errors.push(e);
            }
        }

        if cancel.is_cancelled() {
            details.push("shutdown".to_string());
        }

        self.finish_pass(start, errors, details).await;
    }

    async fn finish_pass(&self, start: chrono::DateTime<Utc>, errors: Vec<String>, details: Vec<String>) {
        let finish = Utc::now();
        let error_summary = summarize_errors(&errors);
        let status = if errors.is_empty() {
            RunStatus::Success
        } else {
            RunStatus::Failure
        };

        let mut detail = if details.is_empty() {
            "no action needed".to_string()
        } else {
            details.join("; ")
        };
        if !error_summary.is_empty() {
            detail = format!("{}; errors: {}", detail, error_summary);
        }

        self.total_runs.fetch_add(1, Ordering::SeqCst);
        *lock_ignore_poison(&self.last_run_finish) = Some(finish);
        *lock_ignore_poison(&self.last_run_error) = if error_summary.is_empty() {
            None
        } else {
            Some(error_summary.clone())
        };

        self.history.record(RunRecord {
            start,
            finish,
            duration_ms: (finish - start).num_milliseconds(),
            status,
            details: detail.clone(),
        });

        match status {
            RunStatus::Success => info!(detail = %detail, "pass complete"),
            RunStatus::Failure => warn!(detail = %detail, "pass completed with errors"),
        }

        self.set_activity("Idle");
        self.write_status_row().await;
    }

    /// A pass suppressed by the pause gate still records a history entry and
    /// a status row, so operators can see the instance is alive but idle.
    async fn finish_skipped_pass(
        &self,
        start: chrono::DateTime<Utc>,
        reason: &str,
        status: RunStatus,
    ) {
        let finish = Utc::now();
        self.set_activity(reason);
        self.activity
            .record(ActivityLevel::Info, format!("Pass skipped: {}", reason), None, None);

        *lock_ignore_poison(&self.last_run_finish) = Some(finish);
        *lock_ignore_poison(&self.last_run_error) = match status {
            RunStatus::Failure => Some(reason.to_string()),
            RunStatus::Success => None,
        };

        self.history.record(RunRecord {
            start,
            finish,
            duration_ms: (finish - start).num_milliseconds(),
            status,
            details: reason.to_string(),
        });

        info!(reason = %reason, "pass skipped");
        self.write_status_row().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmailSettings, WorkerSettings};
    use crate::kernel::test_dependencies::{test_user, TestDeps};

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
    async fn global_pause_skips_pipeline_body() {
        let mocks = TestDeps::default();
        *mocks.control.global_pause.lock().unwrap() = true;
        mocks
            .users
            .users
            .lock()
            .unwrap()
            .push(test_user("anna", "UTC"));

        let worker = worker_with(&mocks);
        worker.run_pass(&CancellationToken::new()).await;

        // Body skipped: no generation, no assignments.
        assert_eq!(mocks.generator.call_count(), 0);
        assert!(mocks.daily.calls().is_empty());

        assert_eq!(worker.current_activity(), "Globally paused");

        // Consistent decision: a skipped pass still records history.
        let history = worker.get_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].details, "Globally paused");
        assert_eq!(history[0].status, RunStatus::Success);
    }

    #[tokio::test]
    async fn instance_pause_skips_pipeline_body() {
        let mocks = TestDeps::default();
        *mocks.control.instance_paused.lock().unwrap() = true;
        mocks
            .users
            .users
            .lock()
            .unwrap()
            .push(test_user("anna", "UTC"));

        let worker = worker_with(&mocks);
        worker.run_pass(&CancellationToken::new()).await;

        assert_eq!(mocks.generator.call_count(), 0);
        assert_eq!(worker.current_activity(), "Paused");
    }

    #[tokio::test]
    async fn failed_pause_lookup_conservatively_suppresses() {
        let mocks = TestDeps::default();
        *mocks.control.fail_global_read.lock().unwrap() = true;

        let worker = worker_with(&mocks);
        worker.run_pass(&CancellationToken::new()).await;

        assert_eq!(mocks.generator.call_count(), 0);
        assert_eq!(worker.current_activity(), "Pause check failed");

        let history = worker.get_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, RunStatus::Failure);
    }

    #[tokio::test]
    async fn unpaused_pass_runs_body_and_records_success() {
        let mocks = TestDeps::default();
        let worker = worker_with(&mocks);
        worker.run_pass(&CancellationToken::new()).await;

        let history = worker.get_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, RunStatus::Success);
        assert_eq!(worker.current_activity(), "Idle");

        // Status row carries run accounting.
        let status = mocks.control.latest_status().unwrap();
        assert_eq!(status.total_runs, 1);
        assert!(status.last_run_start.is_some());
        assert!(status.last_run_finish.is_some());
        assert!(status.last_run_error.is_none());
    }

    #[tokio::test]
    async fn user_lookup_failure_marks_pass_failed() {
        let mocks = TestDeps::default();
        *mocks.users.fail_list.lock().unwrap() = true;

        let worker = worker_with(&mocks);
        worker.run_pass(&CancellationToken::new()).await;

        let history = worker.get_history();
        assert_eq!(history[0].status, RunStatus::Failure);
        assert!(history[0].details.contains("user lookup failed"));

        let status = mocks.control.latest_status().unwrap();
        assert!(status.last_run_error.is_some());
    }

    #[tokio::test]
    async fn history_ring_stays_bounded_across_passes() {
        let mocks = TestDeps::default();
        let worker = Worker::new(
            WorkerSettings {
                instance: "worker-test".into(),
                max_history: 3,
                ..WorkerSettings::default()
            },
            EmailSettings::default(),
            mocks.deps(),
        );

        for _ in 0..5 {
            worker.run_pass(&CancellationToken::new()).await;
        }
        assert_eq!(worker.get_history().len(), 3);
    }
}
