use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::common::{QuestionStatus, QuestionType};

/// The seven-axis variety descriptor stamped on generated questions.
///
/// Fields the selector leaves empty stay empty on the saved record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VarietyElements {
    pub topic_category: String,
    pub grammar_focus: String,
    pub vocabulary_domain: String,
    pub scenario: String,
    pub style_modifier: String,
    pub difficulty_modifier: String,
    pub time_context: String,
}

/// A question as it comes off the AI stream, before persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedQuestion {
    pub content: String,
    pub options: Vec<String>,
    pub correct_answer: i32,
    pub explanation: String,
}

/// Question model - SQL persistence layer
///
/// Created by the worker; immutable thereafter except by admin paths.
#[derive(sqlx::FromRow, Debug, Clone)]
pub struct Question {
    pub id: Uuid,
    pub language: String,
    pub level: String,
    pub question_type: QuestionType,
    pub status: QuestionStatus,
    pub content: String,
    pub options: sqlx::types::Json<Vec<String>>,
    pub correct_answer: i32,
    pub explanation: String,

    // Variety stamp (filled at save time from the selection that drove
    // generation)
    pub topic_category: String,
    pub grammar_focus: String,
    pub vocabulary_domain: String,
    pub scenario: String,
    pub style_modifier: String,
    pub difficulty_modifier: String,
    pub time_context: String,

    pub created_at: DateTime<Utc>,
}

impl Question {
    /// Insert a generated question and add it to the user's pool in one
    /// transaction. Membership is what makes the question "available" for
    /// that user.
    pub async fn insert_with_assignment(
        user_id: Uuid,
        language: &str,
        level: &str,
        question_type: QuestionType,
        generated: &GeneratedQuestion,
        variety: &VarietyElements,
        pool: &PgPool,
    ) -> Result<Uuid> {
        let mut tx = pool.begin().await?;

        let question: Question = sqlx::query_as::<_, Question>(
            "INSERT INTO questions (
                language, level, question_type, status,
                content, options, correct_answer, explanation,
                topic_category, grammar_focus, vocabulary_domain, scenario,
                style_modifier, difficulty_modifier, time_context
             )
             VALUES ($1, $2, $3, 'active', $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
             RETURNING *",
        )
        .bind(language)
        .bind(level)
        .bind(question_type)
        .bind(&generated.content)
        .bind(sqlx::types::Json(&generated.options))
        .bind(generated.correct_answer)
        .bind(&generated.explanation)
        .bind(&variety.topic_category)
        .bind(&variety.grammar_focus)
        .bind(&variety.vocabulary_domain)
        .bind(&variety.scenario)
        .bind(&variety.style_modifier)
        .bind(&variety.difficulty_modifier)
        .bind(&variety.time_context)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO user_question_assignments (user_id, question_id)
             VALUES ($1, $2)
             ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .bind(question.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(question.id)
    }
}

/// A user's answer to a question. Read by the refill engine to exclude
/// recently-correct questions from the eligible pool.
#[derive(sqlx::FromRow, Debug, Clone)]
pub struct UserResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub question_id: Uuid,
    pub answer_index: i32,
    pub is_correct: bool,
    pub response_time_ms: i32,
    pub created_at: DateTime<Utc>,
}

/// Word-of-the-day notification content.
#[derive(Debug, Clone)]
pub struct WordOfTheDay {
    pub word: String,
    pub translation: Option<String>,
    pub example: Option<String>,
}
