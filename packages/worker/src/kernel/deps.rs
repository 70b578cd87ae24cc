//! Worker dependencies (using traits for testability)
//!
//! The central dependency container handed to the worker. Each pipeline
//! stage pulls exactly the capabilities it consumes; tests inject the mock
//! implementations from `test_dependencies`.

use std::sync::Arc;

use crate::domains::control::ControlStore;
use crate::domains::notifications::NotificationLedger;
use crate::domains::questions::{HintStore, QuestionStore};
use crate::domains::scheduling::DailyScheduler;
use crate::domains::stories::StoryService;
use crate::domains::translations::TranslationCache;
use crate::domains::users::UserStore;

use super::traits::{BaseEmailService, BasePushNotificationService, BaseQuestionGenerator};

/// Worker dependencies accessible to pipeline stages.
#[derive(Clone)]
pub struct WorkerDeps {
    pub users: Arc<dyn UserStore>,
    pub questions: Arc<dyn QuestionStore>,
    pub hints: Arc<dyn HintStore>,
    pub daily: Arc<dyn DailyScheduler>,
    pub stories: Arc<dyn StoryService>,
    pub ledger: Arc<dyn NotificationLedger>,
    pub translations: Arc<dyn TranslationCache>,
    pub control: Arc<dyn ControlStore>,
    pub generator: Arc<dyn BaseQuestionGenerator>,
    pub email: Arc<dyn BaseEmailService>,
    pub push: Arc<dyn BasePushNotificationService>,
}

impl WorkerDeps {
    /// Create new WorkerDeps with the given dependencies
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        users: Arc<dyn UserStore>,
        questions: Arc<dyn QuestionStore>,
        hints: Arc<dyn HintStore>,
        daily: Arc<dyn DailyScheduler>,
        stories: Arc<dyn StoryService>,
        ledger: Arc<dyn NotificationLedger>,
        translations: Arc<dyn TranslationCache>,
        control: Arc<dyn ControlStore>,
        generator: Arc<dyn BaseQuestionGenerator>,
        email: Arc<dyn BaseEmailService>,
        push: Arc<dyn BasePushNotificationService>,
    ) -> Self {
        Self {
            users,
            questions,
            hints,
            daily,
            stories,
            ledger,
            translations,
            control,
            generator,
            email,
            push,
        }
    }
}
