//! Daily assignment scheduler.
//!
//! Ensures every eligible user has daily questions assigned for every date
//! in a rolling horizon, computed in that user's local calendar. The
//! storage capability is idempotent per (user, date), which is what lets N
//! replicas run this stage without coordination.

use chrono::{Days, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::common::timezone;
use crate::domains::users::User;

use super::Worker;

#[derive(Default)]
pub(crate) struct ScheduleOutcome {
    pub assigned: u64,
    pub failed: u64,
    pub errors: Vec<String>,
}

pub(crate) async fn run_assignment_stage(
    worker: &Worker,
    users: &[User],
    cancel: &CancellationToken,
) -> ScheduleOutcome {
    let mut outcome = ScheduleOutcome::default();
    let horizon = worker.settings.effective_horizon();

    for user in users {
        if cancel.is_cancelled() {
            break;
        }

        // Advisory pooling: email and pause state do not matter here, only
        // that the user has a learning identity and AI enabled.
        if user.preferred_language.is_empty() || user.current_level.is_empty() || !user.ai_enabled
        {
            continue;
        }

        let tz = timezone::resolve(&user.timezone);
        let today_local = timezone::local_today(Utc::now(), tz);

        let mut user_failures = 0u64;
        for offset in 0..=horizon {
            let date = today_local + Days::new(offset as u64);
            match worker.deps.daily.ensure_assignments(user.id, date).await {
                Ok(()) => outcome.assigned += 1,
                Err(e) => {
                    // Per-date failures are counted; neither the per-user
                    // nor the outer loop aborts.
                    warn!(user = %user.username, %date, error = %e, "daily assignment failed");
                    outcome.failed += 1;
                    user_failures += 1;
                }
            }
        }
        if user_failures > 0 {
            outcome.errors.push(format!(
                "{}: {} daily assignment dates failed",
                user.username, user_failures
            ));
        }
    }

    info!(
        assigned = outcome.assigned,
        failed = outcome.failed,
        "daily assignment stage complete"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmailSettings, WorkerSettings};
    use crate::kernel::test_dependencies::{test_user, TestDeps};
    use chrono::NaiveDate;

    fn worker_with(mocks: &TestDeps, horizon: i64, avoid: i64) -> Worker {
        Worker::new(
            WorkerSettings {
                instance: "worker-test".into(),
                daily_horizon_days: horizon,
                daily_repeat_avoid_days: avoid,
                ..WorkerSettings::default()
            },
            EmailSettings::default(),
            mocks.deps(),
        )
    }

    #[tokio::test]
    async fn assigns_exactly_horizon_plus_one_dates() {
        let mocks = TestDeps::default();
        let worker = worker_with(&mocks, 1, 7);
        let user = test_user("anna", "UTC");

        run_assignment_stage(&worker, &[user.clone()], &CancellationToken::new()).await;

        let calls = mocks.daily.calls();
        // max(1, 7) + 1 = 8 distinct consecutive dates
        assert_eq!(calls.len(), 8);
        let dates: Vec<NaiveDate> = calls.iter().map(|(_, d)| *d).collect();
        for pair in dates.windows(2) {
            assert_eq!(pair[1], pair[0] + Days::new(1));
        }
        assert!(calls.iter().all(|(id, _)| *id == user.id));
    }

    #[tokio::test]
    async fn horizon_dates_use_the_users_local_calendar() {
        let mocks = TestDeps::default();
        let worker = worker_with(&mocks, 1, 7);
        let user = test_user("ben", "America/New_York");

        run_assignment_stage(&worker, &[user], &CancellationToken::new()).await;

        let calls = mocks.daily.calls();
        let expected_start =
            timezone::local_today(Utc::now(), timezone::resolve("America/New_York"));
        assert_eq!(calls[0].1, expected_start);
    }

    #[tokio::test]
    async fn ineligible_users_are_skipped() {
        let mocks = TestDeps::default();
        let worker = worker_with(&mocks, 1, 7);

        let mut no_level = test_user("carla", "UTC");
        no_level.current_level = String::new();
        let mut no_ai = test_user("dan", "UTC");
        no_ai.ai_enabled = false;

        run_assignment_stage(&worker, &[no_level, no_ai], &CancellationToken::new()).await;
        assert!(mocks.daily.calls().is_empty());
    }

    #[tokio::test]
    async fn date_failures_count_but_do_not_abort() {
        let mocks = TestDeps::default();
        let worker = worker_with(&mocks, 1, 2);
        let user = test_user("eva", "UTC");

        let bad_date = timezone::local_today(Utc::now(), timezone::resolve("UTC"));
        mocks.daily.fail_dates.lock().unwrap().insert(bad_date);

        let outcome =
            run_assignment_stage(&worker, &[user], &CancellationToken::new()).await;

        // 3 attempts: today fails, the rest succeed.
        assert_eq!(mocks.daily.calls().len(), 3);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.assigned, 2);
        assert_eq!(outcome.errors.len(), 1);
    }
}
