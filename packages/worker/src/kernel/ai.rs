// AI implementation using rig.rs providers
//
// This is the infrastructure implementation of BaseQuestionGenerator and
// BaseStoryAI. Business logic (what to generate, batch sizing) lives in the
// worker pipeline.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rig::completion::Prompt;
use rig::providers::{anthropic, openai};
use tokio::sync::mpsc;
use tracing::{debug, instrument};

use crate::common::UsageContext;
use crate::domains::questions::{GeneratedQuestion, VarietyElements};
use crate::domains::stories::{Story, StorySection};

use super::traits::{
    BaseQuestionGenerator, BaseStoryAI, QuestionGenRequest, UserAiConfig,
};

/// rig.rs implementation of the AI capabilities. Clients are built per call
/// because provider, model, and API key are all per-user.
pub struct RigAiClient;

impl RigAiClient {
    pub fn new() -> Self {
        Self
    }

    async fn complete(&self, config: &UserAiConfig, prompt: &str) -> Result<String> {
        match config.provider.as_str() {
            "anthropic" => {
                let client = anthropic::ClientBuilder::new(&config.api_key).build();
                let agent = client
                    .agent(&config.model)
                    .preamble("You are a language-learning content author.")
                    .max_tokens(8192)
                    .build();
                agent
                    .prompt(prompt)
                    .await
                    .context("Failed to call Anthropic API")
            }
            // OpenAI-compatible providers go through the openai client.
            _ => {
                let client = openai::Client::new(&config.api_key);
                let agent = client
                    .agent(&config.model)
                    .preamble("You are a language-learning content author.")
                    .max_tokens(8192)
                    .build();
                agent
                    .prompt(prompt)
                    .await
                    .context("Failed to call OpenAI API")
            }
        }
    }
}

impl Default for RigAiClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseQuestionGenerator for RigAiClient {
    fn preferred_batch_size(&self) -> usize {
        5
    }

    #[instrument(
        skip_all,
        fields(
            user_id = %usage.user_id,
            api_key_id = ?usage.api_key_id,
            provider = %config.provider,
            model = %config.model,
        )
    )]
    async fn generate_stream(
        &self,
        usage: UsageContext,
        config: UserAiConfig,
        request: QuestionGenRequest,
        variety: VarietyElements,
        sink: mpsc::Sender<GeneratedQuestion>,
    ) -> Result<()> {
        let prompt = build_question_prompt(&request, &variety);
        let response = self.complete(&config, &prompt).await?;
        let questions: Vec<GeneratedQuestion> = serde_json::from_str(strip_fences(&response))
            .context("AI response was not a valid question array")?;

        debug!(count = questions.len(), "parsed generated questions");

        for question in questions {
            // Receiver gone means the consumer bailed; stop producing.
            if sink.send(question).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BaseStoryAI for RigAiClient {
    async fn continue_story(
        &self,
        config: &UserAiConfig,
        story: &Story,
        previous: &[StorySection],
    ) -> Result<String> {
        let prompt = build_story_prompt(story, previous);
        self.complete(config, &prompt).await
    }
}

fn build_question_prompt(request: &QuestionGenRequest, variety: &VarietyElements) -> String {
    use std::fmt::Write;

    let mut prompt = format!(
        "Generate exactly {count} multiple-choice {qtype} questions for a \
         {level}-level learner of {language}.\n\
         Respond with a JSON array only; each element must have the fields \
         \"content\", \"options\" (4 strings), \"correct_answer\" (0-based \
         index), and \"explanation\".\n",
        count = request.count,
        qtype = request.question_type,
        level = request.level,
        language = request.language,
    );

    let axes = [
        ("Topic", variety.topic_category.as_str()),
        ("Grammar focus", variety.grammar_focus.as_str()),
        ("Vocabulary domain", variety.vocabulary_domain.as_str()),
        ("Scenario", variety.scenario.as_str()),
        ("Style", variety.style_modifier.as_str()),
        ("Difficulty", variety.difficulty_modifier.as_str()),
        ("Time context", variety.time_context.as_str()),
    ];
    for (label, value) in axes {
        if !value.is_empty() {
            let _ = writeln!(prompt, "{}: {}", label, value);
        }
    }

    if let Some(topic) = &request.topic {
        let _ = writeln!(prompt, "Required topic: {}", topic);
    }

    if !request.recent_questions.is_empty() {
        let _ = writeln!(
            prompt,
            "Avoid repeating these recent questions:\n- {}",
            request.recent_questions.join("\n- ")
        );
    }

    prompt
}

fn build_story_prompt(story: &Story, previous: &[StorySection]) -> String {
    let mut context: Vec<&str> = previous.iter().map(|s| s.content.as_str()).collect();
    // find_recent returns newest first; the prompt wants story order.
    context.reverse();

    format!(
        "Continue the story \"{title}\" written in {language} for a {level}-level \
         learner. Write the next section (150-250 words) in plain prose, no \
         headings.\n\nRecent sections:\n{context}",
        title = story.title,
        language = story.language,
        level = story.level,
        context = if context.is_empty() {
            "(none yet - write the opening section)".to_string()
        } else {
            context.join("\n---\n")
        },
    )
}

/// Models wrap JSON in markdown fences often enough to be worth stripping.
fn strip_fences(response: &str) -> &str {
    let trimmed = response.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::QuestionType;

    #[test]
    fn strips_markdown_fences() {
        assert_eq!(strip_fences("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_fences("```\n[1]\n```"), "[1]");
        assert_eq!(strip_fences("[1]"), "[1]");
    }

    #[test]
    fn prompt_includes_only_nonempty_variety_axes() {
        let request = QuestionGenRequest {
            language: "italian".into(),
            level: "B1".into(),
            question_type: QuestionType::Vocabulary,
            count: 5,
            recent_questions: vec!["What does 'cane' mean?".into()],
            topic: None,
        };
        let variety = VarietyElements {
            topic_category: "travel".into(),
            scenario: "at a restaurant".into(),
            ..Default::default()
        };

        let prompt = build_question_prompt(&request, &variety);
        assert!(prompt.contains("Topic: travel"));
        assert!(prompt.contains("Scenario: at a restaurant"));
        assert!(!prompt.contains("Grammar focus:"));
        assert!(prompt.contains("Avoid repeating"));
    }

    #[tokio::test]
    #[ignore] // Requires API key
    async fn generates_against_real_provider() {
        let api_key = std::env::var("OPENAI_API_KEY")
            .expect("OPENAI_API_KEY must be set for integration tests");

        let client = RigAiClient::new();
        let config = UserAiConfig {
            provider: "openai".into(),
            model: "gpt-4o-mini".into(),
            api_key,
            username: "itest".into(),
        };
        let (tx, mut rx) = mpsc::channel(16);
        let request = QuestionGenRequest {
            language: "spanish".into(),
            level: "A2".into(),
            question_type: QuestionType::Vocabulary,
            count: 2,
            recent_questions: vec![],
            topic: None,
        };

        client
            .generate_stream(
                UsageContext {
                    user_id: uuid::Uuid::new_v4(),
                    api_key_id: None,
                },
                config,
                request,
                VarietyElements::default(),
                tx,
            )
            .await
            .expect("generation should succeed");

        let mut received = 0;
        while rx.recv().await.is_some() {
            received += 1;
        }
        assert!(received > 0);
    }
}
