//! End-to-end worker tests against the mock capability implementations.
//!
//! These drive the worker through its public surface only: start it, let
//! the immediate first pass run, then shut it down and inspect what the
//! mocks recorded.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use worker_core::common::QuestionType;
use worker_core::kernel::test_dependencies::{test_prefs, test_user, TestDeps};
use worker_core::worker::{RunStatus, Worker};
use worker_core::{EmailSettings, WorkerSettings};

fn settings() -> WorkerSettings {
    WorkerSettings {
        instance: "worker-itest".into(),
        question_refill_threshold: 5,
        ..WorkerSettings::default()
    }
}

async fn run_one_pass(worker: Arc<Worker>) {
    let token = CancellationToken::new();
    let handle = tokio::spawn(worker.clone().start(token.clone()));

    // The run loop's first tick fires immediately; give the pass room to
    // finish before cancelling.
    tokio::time::sleep(Duration::from_millis(200)).await;
    token.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn first_pass_refills_a_depleted_pool() {
    let mocks = TestDeps::default();
    let user = test_user("anna", "UTC");
    mocks.users.users.lock().unwrap().push(user.clone());
    mocks
        .users
        .prefs
        .lock()
        .unwrap()
        .insert(user.id, test_prefs(user.id));
    mocks.users.api_keys.lock().unwrap().insert(
        (user.id, "openai".into()),
        worker_core::domains::users::ApiKey {
            id: uuid::Uuid::new_v4(),
            user_id: user.id,
            provider: "openai".into(),
            key: "sk-test".into(),
            last_used_at: None,
        },
    );

    // Only vocabulary is depleted.
    for qtype in QuestionType::ALL {
        mocks
            .questions
            .eligible
            .lock()
            .unwrap()
            .insert((user.id, qtype), i64::MAX);
    }
    mocks
        .questions
        .eligible
        .lock()
        .unwrap()
        .insert((user.id, QuestionType::Vocabulary), 0);

    let worker = Arc::new(Worker::new(settings(), EmailSettings::default(), mocks.deps()));
    run_one_pass(worker.clone()).await;

    let saved = mocks.questions.saved_questions();
    assert!(!saved.is_empty());
    assert!(saved
        .iter()
        .all(|s| s.question_type == QuestionType::Vocabulary));

    // Daily assignments were provisioned across the full horizon too.
    let horizon_calls = mocks.daily.calls();
    assert_eq!(horizon_calls.len() as i64, settings().effective_horizon() + 1);

    let history = worker.get_history();
    assert!(!history.is_empty());
    assert_eq!(history[0].status, RunStatus::Success);
}

#[tokio::test]
async fn globally_paused_worker_heartbeats_but_skips_work() {
    let mocks = TestDeps::default();
    *mocks.control.global_pause.lock().unwrap() = true;
    let user = test_user("ben", "UTC");
    mocks.users.users.lock().unwrap().push(user);

    let worker = Arc::new(Worker::new(settings(), EmailSettings::default(), mocks.deps()));
    run_one_pass(worker.clone()).await;

    assert_eq!(mocks.generator.call_count(), 0);
    assert!(mocks.daily.calls().is_empty());

    // The skipped pass is still visible to operators.
    let history = worker.get_history();
    assert_eq!(history[0].details, "Globally paused");

    // Status rows kept flowing while paused.
    assert!(!mocks.control.statuses.lock().unwrap().is_empty());
}

#[tokio::test]
async fn manual_trigger_runs_an_extra_pass() {
    let mocks = TestDeps::default();
    let worker = Arc::new(Worker::new(settings(), EmailSettings::default(), mocks.deps()));

    let token = CancellationToken::new();
    let handle = tokio::spawn(worker.clone().start(token.clone()));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let runs_after_first = worker.get_history().len();
    worker.trigger_manual_run();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(worker.get_history().len(), runs_after_first + 1);

    token.cancel();
    handle.await.unwrap().unwrap();
}
