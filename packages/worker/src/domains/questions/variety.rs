//! Variety selection for question generation.
//!
//! Before each AI call the refill engine gathers a snapshot of what the user
//! needs (weak areas, coverage gaps, priorities, preferences) and the
//! selector turns it into a concrete seven-axis `VarietyElements` record.
//! The same record is stamped on every question saved from that batch.
//!
//! Selection is deterministic: the same snapshot always yields the same
//! elements, which keeps generation reproducible and testable. Rotation
//! across calls comes from the snapshot itself changing as coverage fills in.

use std::collections::HashMap;

use crate::common::QuestionType;
use crate::domains::users::LearningPreferences;

use super::models::VarietyElements;

/// Snapshot of per-user generation pressure, gathered before each AI call.
#[derive(Debug, Clone, Default)]
pub struct PriorityGenerationData {
    /// Topics the user keeps getting wrong.
    pub weak_areas: Vec<String>,
    /// Topics flagged high-priority for this (language, level, type).
    pub high_priority_topics: Vec<String>,
    /// topic -> how many questions are missing for even coverage.
    pub gap_analysis: HashMap<String, i64>,
    /// topic -> share of recent generation that targeted it.
    pub priority_distribution: HashMap<String, f64>,
    pub preferences: Option<LearningPreferences>,
}

static SCENARIOS: &[&str] = &[
    "at a restaurant",
    "asking for directions",
    "a job interview",
    "planning a trip",
    "at the doctor",
    "shopping for groceries",
    "meeting a neighbor",
];

static TIME_CONTEXTS: &[&str] = &["past events", "present habits", "future plans"];

static GRAMMAR_BY_TYPE: &[(QuestionType, &str)] = &[
    (QuestionType::Vocabulary, ""),
    (QuestionType::FillInBlank, "verb conjugation"),
    (QuestionType::QuestionAnswer, "question formation"),
    (QuestionType::ReadingComprehension, "connectors and referents"),
];

static VOCAB_DOMAINS: &[&str] = &[
    "everyday life",
    "work and career",
    "travel",
    "food and cooking",
    "health",
];

/// Turns a generation snapshot into concrete variety elements.
pub struct VarietySelector;

impl VarietySelector {
    /// Pick variety elements for one generation batch.
    pub fn select(data: &PriorityGenerationData, question_type: QuestionType) -> VarietyElements {
        let focus_weak = data
            .preferences
            .as_ref()
            .map(|p| p.focus_on_weak_areas)
            .unwrap_or(false);

        let topic_category = Self::pick_topic(data, focus_weak);

        // Rotate secondary axes off the total outstanding gap so repeated
        // batches against a shrinking gap walk through the pools.
        let gap_total: i64 = data.gap_analysis.values().sum();
        let idx = gap_total.unsigned_abs() as usize;

        let grammar_focus = GRAMMAR_BY_TYPE
            .iter()
            .find(|(t, _)| *t == question_type)
            .map(|(_, g)| g.to_string())
            .unwrap_or_default();

        let vocabulary_domain = if question_type == QuestionType::Vocabulary {
            VOCAB_DOMAINS[idx % VOCAB_DOMAINS.len()].to_string()
        } else {
            String::new()
        };

        let scenario = SCENARIOS[idx % SCENARIOS.len()].to_string();

        let style_modifier = if focus_weak && !data.weak_areas.is_empty() {
            "remedial".to_string()
        } else {
            String::new()
        };

        let difficulty_modifier = match data.priority_distribution.get(&topic_category) {
            // A topic the recent batches already hammered gets a harder cut.
            Some(share) if *share > 0.5 => "challenge".to_string(),
            _ => String::new(),
        };

        let time_context = TIME_CONTEXTS[idx % TIME_CONTEXTS.len()].to_string();

        VarietyElements {
            topic_category,
            grammar_focus,
            vocabulary_domain,
            scenario,
            style_modifier,
            difficulty_modifier,
            time_context,
        }
    }

    /// Topic priority: largest coverage gap, then weak areas (when the user
    /// opted in), then externally flagged topics.
    fn pick_topic(data: &PriorityGenerationData, focus_weak: bool) -> String {
        if let Some((topic, _)) = data
            .gap_analysis
            .iter()
            .filter(|(_, missing)| **missing > 0)
            // Tie-break on topic name so HashMap iteration order can't leak in.
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
        {
            return topic.clone();
        }
        if focus_weak {
            if let Some(weak) = data.weak_areas.first() {
                return weak.clone();
            }
        }
        data.high_priority_topics.first().cloned().unwrap_or_default()
    }
}
