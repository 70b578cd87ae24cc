use serde::{Deserialize, Serialize};
use std::fmt;

/// Question categories supported by the generation pipeline.
///
/// The variant order here is the canonical per-user processing order; active
/// generation hints promote their types to the front of it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "question_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    Vocabulary,
    FillInBlank,
    QuestionAnswer,
    ReadingComprehension,
}

impl QuestionType {
    /// Canonical processing order.
    pub const ALL: [QuestionType; 4] = [
        QuestionType::Vocabulary,
        QuestionType::FillInBlank,
        QuestionType::QuestionAnswer,
        QuestionType::ReadingComprehension,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::Vocabulary => "vocabulary",
            QuestionType::FillInBlank => "fill_in_blank",
            QuestionType::QuestionAnswer => "question_answer",
            QuestionType::ReadingComprehension => "reading_comprehension",
        }
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a question. Only `Active` questions count toward a
/// user's eligible pool.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "question_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QuestionStatus {
    Active,
    Retired,
}

/// Typed usage-attribution context threaded into AI calls so downstream
/// telemetry can attribute cost per user and per key.
#[derive(Debug, Clone, Copy)]
pub struct UsageContext {
    pub user_id: uuid::Uuid,
    pub api_key_id: Option<uuid::Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_order() {
        assert_eq!(
            QuestionType::ALL,
            [
                QuestionType::Vocabulary,
                QuestionType::FillInBlank,
                QuestionType::QuestionAnswer,
                QuestionType::ReadingComprehension,
            ]
        );
    }

    #[test]
    fn snake_case_names() {
        assert_eq!(QuestionType::FillInBlank.as_str(), "fill_in_blank");
        assert_eq!(
            serde_json::to_string(&QuestionType::ReadingComprehension).unwrap(),
            "\"reading_comprehension\""
        );
    }
}
