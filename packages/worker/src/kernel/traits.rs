// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// Business logic (what to refill, when to notify) lives in the worker
// pipeline and domain layers.
//
// Naming convention: Base* for trait names (e.g., BaseQuestionGenerator)

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::common::{QuestionType, UsageContext};
use crate::domains::questions::{GeneratedQuestion, VarietyElements};
use crate::domains::stories::{Story, StorySection};

// =============================================================================
// AI configuration & request types
// =============================================================================

/// Per-call AI provider selection, resolved from the user's settings plus
/// their stored API key (or the server-level fallback key).
#[derive(Debug, Clone)]
pub struct UserAiConfig {
    pub provider: String,
    pub model: String,
    pub api_key: String,
    pub username: String,
}

/// One question-generation request.
#[derive(Debug, Clone)]
pub struct QuestionGenRequest {
    pub language: String,
    pub level: String,
    pub question_type: QuestionType,
    pub count: usize,
    /// Summaries of the user's most recent questions, to reduce repetition.
    pub recent_questions: Vec<String>,
    /// Fixed topic override (admin path); None lets variety selection drive.
    pub topic: Option<String>,
}

// =============================================================================
// Question Generation Trait (Infrastructure - streaming)
// =============================================================================

/// Streaming question generation capability.
///
/// Contract: the implementation pushes zero or more questions into `sink`
/// and then closes it (by dropping the sender); a terminal error is
/// returned out-of-band through the method result, never through the
/// channel. The caller runs this as a supervised task and drains the sink.
#[async_trait]
pub trait BaseQuestionGenerator: Send + Sync {
    /// The provider's preferred batch size; the refill engine grows it when
    /// freshness enforcement demands more.
    fn preferred_batch_size(&self) -> usize {
        5
    }

    async fn generate_stream(
        &self,
        usage: UsageContext,
        config: UserAiConfig,
        request: QuestionGenRequest,
        variety: VarietyElements,
        sink: mpsc::Sender<GeneratedQuestion>,
    ) -> Result<()>;
}

// =============================================================================
// Story AI Trait (Infrastructure)
// =============================================================================

#[async_trait]
pub trait BaseStoryAI: Send + Sync {
    /// Produce the next section's prose for a story, given recent context.
    async fn continue_story(
        &self,
        config: &UserAiConfig,
        story: &Story,
        previous: &[StorySection],
    ) -> Result<String>;
}

// =============================================================================
// Email Trait (Infrastructure)
// =============================================================================

#[async_trait]
pub trait BaseEmailService: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}

// =============================================================================
// Push Notification Trait (Infrastructure)
// =============================================================================

#[async_trait]
pub trait BasePushNotificationService: Send + Sync {
    /// Send a push notification to a device token.
    async fn send_notification(
        &self,
        push_token: &str,
        title: &str,
        body: &str,
        data: serde_json::Value,
    ) -> Result<()>;
}
