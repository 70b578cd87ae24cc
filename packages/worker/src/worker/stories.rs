//! Story section generation stage.
//!
//! For each user with an active, non-paused story, ask the story service
//! for exactly one new section per cycle. The per-story daily cap lives in
//! the story service; hitting it is expected and not a failure.

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::STORY_TIMEOUT;
use crate::domains::stories::StoryError;
use crate::domains::users::User;

use super::status::ActivityLevel;
use super::Worker;

#[derive(Default)]
pub(crate) struct StoryOutcome {
    pub generated: u64,
    pub errors: Vec<String>,
}

pub(crate) async fn run_story_stage(
    worker: &Worker,
    users: &[User],
    cancel: &CancellationToken,
) -> StoryOutcome {
    let mut outcome = StoryOutcome::default();

    for user in users {
        if cancel.is_cancelled() {
            break;
        }
        if !user.ai_enabled || user.ai_provider.is_empty() || user.ai_model.is_empty() {
            continue;
        }

        let story = match worker.deps.stories.active_story(user.id).await {
            Ok(Some(story)) => story,
            Ok(None) => continue,
            Err(e) => {
                warn!(user = %user.username, error = %e, "active story lookup failed");
                continue;
            }
        };
        if story.auto_generation_paused {
            continue;
        }

        // Engagement filter is gated as a unit: disabled means no
        // engagement check at all.
        if worker.story_engagement_gate {
            match worker.deps.stories.latest_section_viewed(story.id).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(user = %user.username, "latest section unviewed, skipping story");
                    continue;
                }
                Err(e) => {
                    warn!(user = %user.username, error = %e, "engagement check failed");
                    continue;
                }
            }
        }

        let Some((config, _)) = super::refill::resolve_user_ai_config(worker, user).await else {
            continue;
        };

        let generation = tokio::time::timeout(
            STORY_TIMEOUT,
            worker
                .deps
                .stories
                .generate_section(story.id, user.id, &config),
        )
        .await;

        match generation {
            Ok(Ok(section)) => {
                outcome.generated += 1;
                worker.activity.record(
                    ActivityLevel::Info,
                    format!("Story section {} generated", section.section_number),
                    Some(user.id),
                    Some(&user.username),
                );
            }
            Ok(Err(StoryError::LimitReached)) => {
                debug!(user = %user.username, "story generation limit reached");
            }
            Ok(Err(StoryError::Other(e))) => {
                warn!(user = %user.username, error = %e, "story generation failed");
                outcome
                    .errors
                    .push(format!("{}: story generation failed: {}", user.username, e));
            }
            Err(_) => {
                warn!(user = %user.username, "story generation timed out");
                outcome
                    .errors
                    .push(format!("{}: story generation timed out", user.username));
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmailSettings, WorkerSettings};
    use crate::kernel::test_dependencies::{test_user, MockStoryOutcome, TestDeps};
    use crate::worker::ServerAiKeys;

    fn worker_with(mocks: &TestDeps) -> Worker {
        Worker::new(
            WorkerSettings {
                instance: "worker-test".into(),
                ..WorkerSettings::default()
            },
            EmailSettings::default(),
            mocks.deps(),
        )
        .with_server_keys(ServerAiKeys {
            openai: Some("sk-server".into()),
            anthropic: None,
        })
    }

    #[tokio::test]
    async fn generates_one_section_for_active_story() {
        let mocks = TestDeps::default();
        let user = test_user("anna", "UTC");
        let mocks = TestDeps {
            stories: std::sync::Arc::new(
                crate::kernel::test_dependencies::MockStoryService::default()
                    .with_active_story(user.id),
            ),
            ..mocks
        };
        let worker = worker_with(&mocks);

        let outcome = run_story_stage(&worker, &[user.clone()], &CancellationToken::new()).await;

        assert_eq!(outcome.generated, 1);
        assert!(outcome.errors.is_empty());
        assert_eq!(mocks.stories.generated.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn limit_reached_is_silent() {
        let mocks = TestDeps::default();
        let user = test_user("ben", "UTC");
        let mocks = TestDeps {
            stories: std::sync::Arc::new(
                crate::kernel::test_dependencies::MockStoryService::default()
                    .with_active_story(user.id),
            ),
            ..mocks
        };
        *mocks.stories.outcome.lock().unwrap() = MockStoryOutcome::LimitReached;
        let worker = worker_with(&mocks);

        let outcome = run_story_stage(&worker, &[user], &CancellationToken::new()).await;

        assert_eq!(outcome.generated, 0);
        assert!(outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn generation_error_is_recorded_but_not_fatal() {
        let mocks = TestDeps::default();
        let user = test_user("carla", "UTC");
        let other = test_user("dan", "UTC");
        let mocks = TestDeps {
            stories: std::sync::Arc::new(
                crate::kernel::test_dependencies::MockStoryService::default()
                    .with_active_story(user.id),
            ),
            ..mocks
        };
        *mocks.stories.outcome.lock().unwrap() = MockStoryOutcome::Error;
        let worker = worker_with(&mocks);

        let outcome =
            run_story_stage(&worker, &[user, other], &CancellationToken::new()).await;

        assert_eq!(outcome.generated, 0);
        assert_eq!(outcome.errors.len(), 1);
    }

    #[tokio::test]
    async fn paused_story_is_skipped() {
        let mocks = TestDeps::default();
        let user = test_user("eva", "UTC");
        let mocks = TestDeps {
            stories: std::sync::Arc::new(
                crate::kernel::test_dependencies::MockStoryService::default()
                    .with_active_story(user.id),
            ),
            ..mocks
        };
        if let Some(story) = mocks.stories.story.lock().unwrap().as_mut() {
            story.auto_generation_paused = true;
        }
        let worker = worker_with(&mocks);

        let outcome = run_story_stage(&worker, &[user], &CancellationToken::new()).await;
        assert_eq!(outcome.generated, 0);
        assert!(mocks.stories.generated.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn engagement_gate_skips_unviewed_when_enabled() {
        let mocks = TestDeps::default();
        let user = test_user("finn", "UTC");
        let mocks = TestDeps {
            stories: std::sync::Arc::new(
                crate::kernel::test_dependencies::MockStoryService::default()
                    .with_active_story(user.id),
            ),
            ..mocks
        };
        *mocks.stories.latest_viewed.lock().unwrap() = false;

        // Gate disabled: engagement is not consulted.
        let worker = worker_with(&mocks);
        let outcome = run_story_stage(&worker, &[user.clone()], &CancellationToken::new()).await;
        assert_eq!(outcome.generated, 1);

        // Gate enabled: unviewed latest section blocks generation.
        let worker = worker_with(&mocks).with_engagement_gate(true);
        let outcome = run_story_stage(&worker, &[user], &CancellationToken::new()).await;
        assert_eq!(outcome.generated, 0);
    }
}
