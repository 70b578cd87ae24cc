use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::common::QuestionType;
use crate::domains::users::LearningPreferences;

use super::models::{GeneratedQuestion, VarietyElements, WordOfTheDay};
use super::variety::PriorityGenerationData;

/// Question pool operations the refill engine and the word-of-day
/// dispatcher consume.
#[async_trait]
pub trait QuestionStore: Send + Sync {
    /// Count of questions in the user's pool that are active, match
    /// (language, level, type), and have no correct response inside
    /// `correct_window` (the UTC image of the user-local two-day interval).
    async fn eligible_count(
        &self,
        user_id: Uuid,
        language: &str,
        level: &str,
        question_type: QuestionType,
        correct_window: (DateTime<Utc>, DateTime<Utc>),
    ) -> Result<i64>;

    /// Persist one generated question and assign it to the user.
    async fn save_generated(
        &self,
        user_id: Uuid,
        language: &str,
        level: &str,
        question_type: QuestionType,
        question: &GeneratedQuestion,
        variety: &VarietyElements,
    ) -> Result<Uuid>;

    /// Content summaries of the user's most recent questions for this
    /// combination, newest first. Sent to the AI to reduce repetition.
    async fn recent_summaries(
        &self,
        user_id: Uuid,
        language: &str,
        level: &str,
        question_type: QuestionType,
        limit: i64,
    ) -> Result<Vec<String>>;

    /// Probe up to `probe_limit` of the user's adaptive-candidate set and
    /// count entries with zero prior responses.
    async fn fresh_candidate_count(
        &self,
        user_id: Uuid,
        language: &str,
        level: &str,
        question_type: QuestionType,
        probe_limit: i64,
    ) -> Result<i64>;

    /// Gather the per-user generation-pressure snapshot for variety
    /// selection.
    async fn generation_data(
        &self,
        user_id: Uuid,
        language: &str,
        level: &str,
        question_type: QuestionType,
        preferences: Option<LearningPreferences>,
    ) -> Result<PriorityGenerationData>;

    /// Deterministic word pick for the given language and date.
    async fn word_of_the_day(&self, language: &str, date: NaiveDate)
        -> Result<Option<WordOfTheDay>>;
}

/// Postgres-backed question store.
pub struct PgQuestionStore {
    pool: PgPool,
}

impl PgQuestionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuestionStore for PgQuestionStore {
    async fn eligible_count(
        &self,
        user_id: Uuid,
        language: &str,
        level: &str,
        question_type: QuestionType,
        correct_window: (DateTime<Utc>, DateTime<Utc>),
    ) -> Result<i64> {
        let (window_start, window_end) = correct_window;
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*)
             FROM questions q
             JOIN user_question_assignments uqa
               ON uqa.question_id = q.id AND uqa.user_id = $1
             WHERE q.status = 'active'
               AND q.language = $2
               AND q.level = $3
               AND q.question_type = $4
               AND NOT EXISTS (
                   SELECT 1 FROM user_responses r
                   WHERE r.user_id = $1
                     AND r.question_id = q.id
                     AND r.is_correct = true
                     AND r.created_at >= $5
                     AND r.created_at < $6
               )",
        )
        .bind(user_id)
        .bind(language)
        .bind(level)
        .bind(question_type)
        .bind(window_start)
        .bind(window_end)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.0)
    }

    async fn save_generated(
        &self,
        user_id: Uuid,
        language: &str,
        level: &str,
        question_type: QuestionType,
        question: &GeneratedQuestion,
        variety: &VarietyElements,
    ) -> Result<Uuid> {
        super::models::Question::insert_with_assignment(
            user_id,
            language,
            level,
            question_type,
            question,
            variety,
            &self.pool,
        )
        .await
    }

    async fn recent_summaries(
        &self,
        user_id: Uuid,
        language: &str,
        level: &str,
        question_type: QuestionType,
        limit: i64,
    ) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT q.content
             FROM questions q
             JOIN user_question_assignments uqa
               ON uqa.question_id = q.id AND uqa.user_id = $1
             WHERE q.language = $2 AND q.level = $3 AND q.question_type = $4
             ORDER BY q.created_at DESC
             LIMIT $5",
        )
        .bind(user_id)
        .bind(language)
        .bind(level)
        .bind(question_type)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(content,)| content).collect())
    }

    async fn fresh_candidate_count(
        &self,
        user_id: Uuid,
        language: &str,
        level: &str,
        question_type: QuestionType,
        probe_limit: i64,
    ) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM (
                 SELECT q.id,
                        (SELECT COUNT(*) FROM user_responses r
                          WHERE r.user_id = $1 AND r.question_id = q.id) AS responses
                 FROM questions q
                 JOIN user_question_assignments uqa
                   ON uqa.question_id = q.id AND uqa.user_id = $1
                 WHERE q.status = 'active'
                   AND q.language = $2 AND q.level = $3 AND q.question_type = $4
                 ORDER BY q.created_at DESC
                 LIMIT $5
             ) candidates
             WHERE candidates.responses = 0",
        )
        .bind(user_id)
        .bind(language)
        .bind(level)
        .bind(question_type)
        .bind(probe_limit)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.0)
    }

    async fn generation_data(
        &self,
        user_id: Uuid,
        language: &str,
        level: &str,
        question_type: QuestionType,
        preferences: Option<LearningPreferences>,
    ) -> Result<PriorityGenerationData> {
        // Weak areas: topics where the user's correct rate is under 50%.
        let weak_rows: Vec<(String,)> = sqlx::query_as(
            "SELECT q.topic_category
             FROM user_responses r
             JOIN questions q ON q.id = r.question_id
             WHERE r.user_id = $1
               AND q.language = $2 AND q.level = $3
               AND q.topic_category <> ''
             GROUP BY q.topic_category
             HAVING AVG(CASE WHEN r.is_correct THEN 1.0 ELSE 0.0 END) < 0.5
             ORDER BY AVG(CASE WHEN r.is_correct THEN 1.0 ELSE 0.0 END)",
        )
        .bind(user_id)
        .bind(language)
        .bind(level)
        .fetch_all(&self.pool)
        .await?;

        // Gap analysis: how far each covered topic is below the pool's
        // per-topic average for this combination.
        let gap_rows: Vec<(String, i64)> = sqlx::query_as(
            "WITH coverage AS (
                 SELECT q.topic_category, COUNT(*) AS cnt
                 FROM questions q
                 JOIN user_question_assignments uqa
                   ON uqa.question_id = q.id AND uqa.user_id = $1
                 WHERE q.language = $2 AND q.level = $3 AND q.question_type = $4
                   AND q.topic_category <> ''
                 GROUP BY q.topic_category
             )
             SELECT topic_category,
                    GREATEST(0, (SELECT COALESCE(MAX(cnt), 0) FROM coverage) - cnt)
             FROM coverage",
        )
        .bind(user_id)
        .bind(language)
        .bind(level)
        .bind(question_type)
        .fetch_all(&self.pool)
        .await?;

        // Priority distribution: share of the user's recent questions per
        // topic, over the last 50 generated.
        let dist_rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT topic_category, COUNT(*) FROM (
                 SELECT q.topic_category
                 FROM questions q
                 JOIN user_question_assignments uqa
                   ON uqa.question_id = q.id AND uqa.user_id = $1
                 WHERE q.language = $2 AND q.level = $3 AND q.question_type = $4
                   AND q.topic_category <> ''
                 ORDER BY q.created_at DESC
                 LIMIT 50
             ) recent
             GROUP BY topic_category",
        )
        .bind(user_id)
        .bind(language)
        .bind(level)
        .bind(question_type)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = dist_rows.iter().map(|(_, n)| n).sum();
        let priority_distribution: HashMap<String, f64> = dist_rows
            .into_iter()
            .map(|(topic, n)| {
                let share = if total > 0 { n as f64 / total as f64 } else { 0.0 };
                (topic, share)
            })
            .collect();

        // Externally curated promotions for this combination, strongest
        // first.
        let priority_rows: Vec<(String,)> = sqlx::query_as(
            "SELECT topic FROM priority_topics
             WHERE user_id = $1 AND language = $2 AND level = $3 AND question_type = $4
             ORDER BY priority DESC, topic",
        )
        .bind(user_id)
        .bind(language)
        .bind(level)
        .bind(question_type)
        .fetch_all(&self.pool)
        .await?;

        Ok(PriorityGenerationData {
            weak_areas: weak_rows.into_iter().map(|(t,)| t).collect(),
            high_priority_topics: priority_rows.into_iter().map(|(t,)| t).collect(),
            gap_analysis: gap_rows.into_iter().collect(),
            priority_distribution,
            preferences,
        })
    }

    async fn word_of_the_day(
        &self,
        language: &str,
        date: NaiveDate,
    ) -> Result<Option<WordOfTheDay>> {
        // Deterministic daily pick: order the vocabulary pool and index it
        // by the day number so every instance agrees on the same word.
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM words_of_the_day WHERE language = $1",
        )
        .bind(language)
        .fetch_one(&self.pool)
        .await?;

        if count.0 == 0 {
            return Ok(None);
        }

        let offset = date.num_days_from_ce() as i64 % count.0;
        let row: Option<(String, Option<String>, Option<String>)> = sqlx::query_as(
            "SELECT word, translation, example
             FROM words_of_the_day
             WHERE language = $1
             ORDER BY word
             OFFSET $2 LIMIT 1",
        )
        .bind(language)
        .bind(offset)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(word, translation, example)| WordOfTheDay {
            word,
            translation,
            example,
        }))
    }
}
