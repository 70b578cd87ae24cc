// Mock implementations for testing
//
// Provides in-memory capability implementations that can be injected into
// WorkerDeps for tests. Compiled unconditionally so downstream crates'
// tests can use them too.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::common::{QuestionType, UsageContext};
use crate::domains::control::{ControlStore, WorkerStatusRow};
use crate::domains::notifications::{
    NotificationChannel, NotificationLedger, NotificationStatus, NotificationType,
};
use crate::domains::questions::{
    GeneratedQuestion, GenerationHint, HintStore, PriorityGenerationData, QuestionStore,
    VarietyElements, WordOfTheDay,
};
use crate::domains::scheduling::DailyScheduler;
use crate::domains::stories::{Story, StoryError, StoryService, StorySection};
use crate::domains::translations::{TranslationCache, TranslationCacheEntry};
use crate::domains::users::{ApiKey, LearningPreferences, User, UserStore};

use super::deps::WorkerDeps;
use super::traits::{
    BaseEmailService, BasePushNotificationService, BaseQuestionGenerator, QuestionGenRequest,
    UserAiConfig,
};

// =============================================================================
// Fixture builders
// =============================================================================

pub fn test_user(username: &str, timezone: &str) -> User {
    User {
        id: Uuid::new_v4(),
        username: username.to_string(),
        email: Some(format!("{}@example.com", username)),
        preferred_language: "italian".to_string(),
        current_level: "B1".to_string(),
        timezone: timezone.to_string(),
        ai_enabled: true,
        ai_provider: "openai".to_string(),
        ai_model: "gpt-4o-mini".to_string(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn test_prefs(user_id: Uuid) -> LearningPreferences {
    LearningPreferences {
        user_id,
        focus_on_weak_areas: false,
        fresh_question_ratio: 0.7,
        daily_goal: 10,
        ai_paused: false,
        daily_reminder_enabled: true,
        word_of_day_enabled: true,
        push_notifications_enabled: false,
        last_daily_reminder_sent: None,
    }
}

pub fn test_question(n: usize) -> GeneratedQuestion {
    GeneratedQuestion {
        content: format!("Question {}", n),
        options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
        correct_answer: 0,
        explanation: format!("Explanation {}", n),
    }
}

pub fn test_questions(count: usize) -> Vec<GeneratedQuestion> {
    (0..count).map(test_question).collect()
}

// =============================================================================
// Mock user store
// =============================================================================

#[derive(Default)]
pub struct MockUserStore {
    pub users: Mutex<Vec<User>>,
    pub prefs: Mutex<HashMap<Uuid, LearningPreferences>>,
    pub api_keys: Mutex<HashMap<(Uuid, String), ApiKey>>,
    pub tokens: Mutex<HashMap<Uuid, Vec<String>>>,
    pub touched_keys: Mutex<Vec<Uuid>>,
    pub fail_list: Mutex<bool>,
}

impl MockUserStore {
    pub fn with_user(self, user: User) -> Self {
        self.users.lock().unwrap().push(user);
        self
    }

    pub fn with_prefs(self, prefs: LearningPreferences) -> Self {
        self.prefs.lock().unwrap().insert(prefs.user_id, prefs);
        self
    }

    pub fn with_api_key(self, key: ApiKey) -> Self {
        self.api_keys
            .lock()
            .unwrap()
            .insert((key.user_id, key.provider.clone()), key);
        self
    }

    pub fn touched(&self) -> Vec<Uuid> {
        self.touched_keys.lock().unwrap().clone()
    }
}

#[async_trait]
impl UserStore for MockUserStore {
    async fn list_users(&self) -> Result<Vec<User>> {
        if *self.fail_list.lock().unwrap() {
            anyhow::bail!("user lookup failed");
        }
        Ok(self.users.lock().unwrap().clone())
    }

    async fn learning_preferences(&self, user_id: Uuid) -> Result<Option<LearningPreferences>> {
        Ok(self.prefs.lock().unwrap().get(&user_id).cloned())
    }

    async fn api_key(&self, user_id: Uuid, provider: &str) -> Result<Option<ApiKey>> {
        Ok(self
            .api_keys
            .lock()
            .unwrap()
            .get(&(user_id, provider.to_string()))
            .cloned())
    }

    async fn touch_api_key(&self, api_key_id: Uuid) -> Result<()> {
        self.touched_keys.lock().unwrap().push(api_key_id);
        Ok(())
    }

    async fn mark_daily_reminder_sent(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        if let Some(prefs) = self.prefs.lock().unwrap().get_mut(&user_id) {
            prefs.last_daily_reminder_sent = Some(at);
        }
        Ok(())
    }

    async fn push_tokens(&self, user_id: Uuid) -> Result<Vec<String>> {
        Ok(self
            .tokens
            .lock()
            .unwrap()
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }
}

// =============================================================================
// Mock question store
// =============================================================================

#[derive(Debug, Clone)]
pub struct SavedQuestion {
    pub user_id: Uuid,
    pub question_type: QuestionType,
    pub question: GeneratedQuestion,
    pub variety: VarietyElements,
}

#[derive(Default)]
pub struct MockQuestionStore {
    /// (user, type) -> eligible count. Missing entries read as 0.
    pub eligible: Mutex<HashMap<(Uuid, QuestionType), i64>>,
    /// (user, type) -> fresh candidate count.
    pub fresh: Mutex<HashMap<(Uuid, QuestionType), i64>>,
    pub saved: Mutex<Vec<SavedQuestion>>,
    /// Fail saves after this many successes (for partial-save scenarios).
    pub fail_saves_after: Mutex<Option<usize>>,
    pub fail_eligible: Mutex<bool>,
    pub word: Mutex<Option<WordOfTheDay>>,
    /// Curated topic promotions surfaced through `generation_data`.
    pub high_priority_topics: Mutex<Vec<String>>,
}

impl MockQuestionStore {
    pub fn with_eligible(self, user_id: Uuid, qtype: QuestionType, count: i64) -> Self {
        self.eligible.lock().unwrap().insert((user_id, qtype), count);
        self
    }

    pub fn with_fresh(self, user_id: Uuid, qtype: QuestionType, count: i64) -> Self {
        self.fresh.lock().unwrap().insert((user_id, qtype), count);
        self
    }

    pub fn saved_questions(&self) -> Vec<SavedQuestion> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl QuestionStore for MockQuestionStore {
    async fn eligible_count(
        &self,
        user_id: Uuid,
        _language: &str,
        _level: &str,
        question_type: QuestionType,
        _correct_window: (DateTime<Utc>, DateTime<Utc>),
    ) -> Result<i64> {
        if *self.fail_eligible.lock().unwrap() {
            anyhow::bail!("eligible count query failed");
        }
        Ok(*self
            .eligible
            .lock()
            .unwrap()
            .get(&(user_id, question_type))
            .unwrap_or(&i64::MAX))
    }

    async fn save_generated(
        &self,
        user_id: Uuid,
        _language: &str,
        _level: &str,
        question_type: QuestionType,
        question: &GeneratedQuestion,
        variety: &VarietyElements,
    ) -> Result<Uuid> {
        let mut saved = self.saved.lock().unwrap();
        if let Some(limit) = *self.fail_saves_after.lock().unwrap() {
            if saved.len() >= limit {
                anyhow::bail!("save failed");
            }
        }
        saved.push(SavedQuestion {
            user_id,
            question_type,
            question: question.clone(),
            variety: variety.clone(),
        });
        Ok(Uuid::new_v4())
    }

    async fn recent_summaries(
        &self,
        _user_id: Uuid,
        _language: &str,
        _level: &str,
        _question_type: QuestionType,
        _limit: i64,
    ) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn fresh_candidate_count(
        &self,
        user_id: Uuid,
        _language: &str,
        _level: &str,
        question_type: QuestionType,
        _probe_limit: i64,
    ) -> Result<i64> {
        Ok(*self
            .fresh
            .lock()
            .unwrap()
            .get(&(user_id, question_type))
            .unwrap_or(&0))
    }

    async fn generation_data(
        &self,
        _user_id: Uuid,
        _language: &str,
        _level: &str,
        _question_type: QuestionType,
        preferences: Option<LearningPreferences>,
    ) -> Result<PriorityGenerationData> {
        Ok(PriorityGenerationData {
            high_priority_topics: self.high_priority_topics.lock().unwrap().clone(),
            preferences,
            ..Default::default()
        })
    }

    async fn word_of_the_day(
        &self,
        _language: &str,
        _date: NaiveDate,
    ) -> Result<Option<WordOfTheDay>> {
        Ok(self.word.lock().unwrap().clone())
    }
}

// =============================================================================
// Mock hint store
// =============================================================================

#[derive(Default)]
pub struct MockHintStore {
    pub hints: Mutex<Vec<GenerationHint>>,
    pub cleared: Mutex<Vec<(Uuid, QuestionType)>>,
}

impl MockHintStore {
    pub fn with_hint(self, user_id: Uuid, qtype: QuestionType) -> Self {
        self.hints.lock().unwrap().push(GenerationHint {
            id: Uuid::new_v4(),
            user_id,
            language: "italian".into(),
            level: "B1".into(),
            question_type: qtype,
            expires_at: Utc::now() + chrono::Duration::hours(1),
            created_at: Utc::now(),
        });
        self
    }
}

#[async_trait]
impl HintStore for MockHintStore {
    async fn active_hints(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<GenerationHint>> {
        Ok(self
            .hints
            .lock()
            .unwrap()
            .iter()
            .filter(|h| h.user_id == user_id && h.expires_at > now)
            .cloned()
            .collect())
    }

    async fn clear_hint(
        &self,
        user_id: Uuid,
        _language: &str,
        _level: &str,
        question_type: QuestionType,
    ) -> Result<()> {
        self.cleared.lock().unwrap().push((user_id, question_type));
        self.hints
            .lock()
            .unwrap()
            .retain(|h| !(h.user_id == user_id && h.question_type == question_type));
        Ok(())
    }
}

// =============================================================================
// Mock daily scheduler
// =============================================================================

#[derive(Default)]
pub struct MockDailyScheduler {
    pub calls: Mutex<Vec<(Uuid, NaiveDate)>>,
    pub fail_dates: Mutex<HashSet<NaiveDate>>,
}

impl MockDailyScheduler {
    pub fn calls(&self) -> Vec<(Uuid, NaiveDate)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DailyScheduler for MockDailyScheduler {
    async fn ensure_assignments(&self, user_id: Uuid, date: NaiveDate) -> Result<()> {
        self.calls.lock().unwrap().push((user_id, date));
        if self.fail_dates.lock().unwrap().contains(&date) {
            anyhow::bail!("assignment failed for {}", date);
        }
        Ok(())
    }
}

// =============================================================================
// Mock story service
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockStoryOutcome {
    Generated,
    LimitReached,
    Error,
}

pub struct MockStoryService {
    pub story: Mutex<Option<Story>>,
    pub latest_viewed: Mutex<bool>,
    pub outcome: Mutex<MockStoryOutcome>,
    pub generated: Mutex<Vec<(Uuid, Uuid)>>,
}

impl Default for MockStoryService {
    fn default() -> Self {
        Self {
            story: Mutex::new(None),
            latest_viewed: Mutex::new(true),
            outcome: Mutex::new(MockStoryOutcome::Generated),
            generated: Mutex::new(Vec::new()),
        }
    }
}

impl MockStoryService {
    pub fn with_active_story(self, user_id: Uuid) -> Self {
        *self.story.lock().unwrap() = Some(Story {
            id: Uuid::new_v4(),
            user_id,
            title: "La citta' nascosta".into(),
            language: "italian".into(),
            level: "B1".into(),
            status: "active".into(),
            auto_generation_paused: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });
        self
    }
}

#[async_trait]
impl StoryService for MockStoryService {
    async fn active_story(&self, user_id: Uuid) -> Result<Option<Story>> {
        Ok(self
            .story
            .lock()
            .unwrap()
            .clone()
            .filter(|s| s.user_id == user_id))
    }

    async fn latest_section_viewed(&self, _story_id: Uuid) -> Result<bool> {
        Ok(*self.latest_viewed.lock().unwrap())
    }

    async fn generate_section(
        &self,
        story_id: Uuid,
        user_id: Uuid,
        _ai_config: &UserAiConfig,
    ) -> Result<StorySection, StoryError> {
        match *self.outcome.lock().unwrap() {
            MockStoryOutcome::LimitReached => Err(StoryError::LimitReached),
            MockStoryOutcome::Error => {
                Err(StoryError::Other(anyhow::anyhow!("story generation failed")))
            }
            MockStoryOutcome::Generated => {
                self.generated.lock().unwrap().push((story_id, user_id));
                Ok(StorySection {
                    id: Uuid::new_v4(),
                    story_id,
                    section_number: 1,
                    content: "Una nuova sezione.".into(),
                    viewed_at: None,
                    created_at: Utc::now(),
                })
            }
        }
    }
}

// =============================================================================
// Mock notification ledger
// =============================================================================

#[derive(Default)]
pub struct MockNotificationLedger {
    pub delivered: Mutex<HashSet<(Uuid, NotificationType, NotificationChannel)>>,
    pub records: Mutex<Vec<(Uuid, NotificationType, NotificationChannel, NotificationStatus)>>,
}

impl MockNotificationLedger {
    pub fn records(
        &self,
    ) -> Vec<(Uuid, NotificationType, NotificationChannel, NotificationStatus)> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationLedger for MockNotificationLedger {
    async fn delivered_in_window(
        &self,
        user_id: Uuid,
        notification_type: NotificationType,
        channel: NotificationChannel,
        _window: (DateTime<Utc>, DateTime<Utc>),
    ) -> Result<bool> {
        Ok(self
            .delivered
            .lock()
            .unwrap()
            .contains(&(user_id, notification_type, channel)))
    }

    async fn record(
        &self,
        user_id: Uuid,
        notification_type: NotificationType,
        channel: NotificationChannel,
        status: NotificationStatus,
        _error_message: Option<&str>,
    ) -> Result<()> {
        if matches!(status, NotificationStatus::Sent | NotificationStatus::Partial) {
            self.delivered
                .lock()
                .unwrap()
                .insert((user_id, notification_type, channel));
        }
        self.records
            .lock()
            .unwrap()
            .push((user_id, notification_type, channel, status));
        Ok(())
    }
}

// =============================================================================
// Mock translation cache
// =============================================================================

#[derive(Default)]
pub struct MockTranslationCache {
    pub entries: Mutex<Vec<TranslationCacheEntry>>,
    pub expired: Mutex<u64>,
    pub delete_calls: Mutex<u32>,
    pub bumped: Mutex<Vec<Uuid>>,
}

#[async_trait]
impl TranslationCache for MockTranslationCache {
    async fn lookup(
        &self,
        source_text: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<Option<TranslationCacheEntry>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| {
                e.source_text == source_text
                    && e.source_language == source_language
                    && e.target_language == target_language
            })
            .cloned())
    }

    async fn bump_hits(&self, id: Uuid) -> Result<()> {
        self.bumped.lock().unwrap().push(id);
        Ok(())
    }

    async fn delete_expired(&self, _now: DateTime<Utc>) -> Result<u64> {
        *self.delete_calls.lock().unwrap() += 1;
        Ok(*self.expired.lock().unwrap())
    }
}

// =============================================================================
// Mock control store
// =============================================================================

#[derive(Default)]
pub struct MockControlStore {
    pub global_pause: Mutex<bool>,
    pub fail_global_read: Mutex<bool>,
    pub instance_paused: Mutex<bool>,
    pub statuses: Mutex<Vec<WorkerStatusRow>>,
    pub heartbeats: Mutex<Vec<DateTime<Utc>>>,
}

impl MockControlStore {
    pub fn latest_status(&self) -> Option<WorkerStatusRow> {
        self.statuses.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ControlStore for MockControlStore {
    async fn global_pause(&self) -> Result<bool> {
        if *self.fail_global_read.lock().unwrap() {
            anyhow::bail!("settings read failed");
        }
        Ok(*self.global_pause.lock().unwrap())
    }

    async fn set_global_pause(&self, paused: bool) -> Result<()> {
        *self.global_pause.lock().unwrap() = paused;
        Ok(())
    }

    async fn instance_paused(&self, _instance: &str) -> Result<bool> {
        Ok(*self.instance_paused.lock().unwrap())
    }

    async fn set_instance_paused(&self, _instance: &str, paused: bool) -> Result<()> {
        *self.instance_paused.lock().unwrap() = paused;
        Ok(())
    }

    async fn upsert_status(&self, row: &WorkerStatusRow) -> Result<()> {
        self.statuses.lock().unwrap().push(row.clone());
        Ok(())
    }

    async fn heartbeat(&self, _instance: &str, at: DateTime<Utc>) -> Result<()> {
        self.heartbeats.lock().unwrap().push(at);
        Ok(())
    }
}

// =============================================================================
// Mock question generator
// =============================================================================

pub enum MockGenOutcome {
    Questions(Vec<GeneratedQuestion>),
    Error(String),
    /// Panic inside the producer task, for supervision tests.
    Panic,
}

#[derive(Debug, Clone)]
pub struct RecordedGenCall {
    pub count: usize,
    pub variety: VarietyElements,
    pub topic: Option<String>,
}

pub struct MockQuestionGenerator {
    pub batch_size: usize,
    pub outcomes: Mutex<VecDeque<MockGenOutcome>>,
    pub calls: Mutex<Vec<RecordedGenCall>>,
}

impl Default for MockQuestionGenerator {
    fn default() -> Self {
        Self {
            batch_size: 10,
            outcomes: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl MockQuestionGenerator {
    pub fn with_outcome(self, outcome: MockGenOutcome) -> Self {
        self.outcomes.lock().unwrap().push_back(outcome);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<RecordedGenCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BaseQuestionGenerator for MockQuestionGenerator {
    fn preferred_batch_size(&self) -> usize {
        self.batch_size
    }

    async fn generate_stream(
        &self,
        _usage: UsageContext,
        _config: UserAiConfig,
        request: QuestionGenRequest,
        variety: VarietyElements,
        sink: mpsc::Sender<GeneratedQuestion>,
    ) -> Result<()> {
        self.calls.lock().unwrap().push(RecordedGenCall {
            count: request.count,
            variety: variety.clone(),
            topic: request.topic.clone(),
        });

        let outcome = self.outcomes.lock().unwrap().pop_front();
        match outcome {
            Some(MockGenOutcome::Error(message)) => anyhow::bail!("{}", message),
            Some(MockGenOutcome::Panic) => panic!("mock provider panic"),
            Some(MockGenOutcome::Questions(questions)) => {
                for question in questions {
                    if sink.send(question).await.is_err() {
                        break;
                    }
                }
                Ok(())
            }
            // No queued outcome: echo the requested count.
            None => {
                for question in test_questions(request.count) {
                    if sink.send(question).await.is_err() {
                        break;
                    }
                }
                Ok(())
            }
        }
    }
}

// =============================================================================
// Mock email / push
// =============================================================================

#[derive(Default)]
pub struct MockEmailService {
    pub sent: Mutex<Vec<(String, String)>>,
    pub fail: Mutex<bool>,
}

impl MockEmailService {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl BaseEmailService for MockEmailService {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> Result<()> {
        if *self.fail.lock().unwrap() {
            anyhow::bail!("smtp unavailable");
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct MockPushService {
    pub sent: Mutex<Vec<(String, String)>>,
    pub fail_tokens: Mutex<HashSet<String>>,
}

#[async_trait]
impl BasePushNotificationService for MockPushService {
    async fn send_notification(
        &self,
        push_token: &str,
        title: &str,
        _body: &str,
        _data: serde_json::Value,
    ) -> Result<()> {
        if self.fail_tokens.lock().unwrap().contains(push_token) {
            anyhow::bail!("device not registered");
        }
        self.sent
            .lock()
            .unwrap()
            .push((push_token.to_string(), title.to_string()));
        Ok(())
    }
}

// =============================================================================
// TestDeps: everything wired together
// =============================================================================

/// All mocks plus a ready-made `WorkerDeps`. Tests keep the Arcs to inspect
/// recorded calls after driving the worker.
pub struct TestDeps {
    pub users: Arc<MockUserStore>,
    pub questions: Arc<MockQuestionStore>,
    pub hints: Arc<MockHintStore>,
    pub daily: Arc<MockDailyScheduler>,
    pub stories: Arc<MockStoryService>,
    pub ledger: Arc<MockNotificationLedger>,
    pub translations: Arc<MockTranslationCache>,
    pub control: Arc<MockControlStore>,
    pub generator: Arc<MockQuestionGenerator>,
    pub email: Arc<MockEmailService>,
    pub push: Arc<MockPushService>,
}

impl Default for TestDeps {
    fn default() -> Self {
        Self {
            users: Arc::new(MockUserStore::default()),
            questions: Arc::new(MockQuestionStore::default()),
            hints: Arc::new(MockHintStore::default()),
            daily: Arc::new(MockDailyScheduler::default()),
            stories: Arc::new(MockStoryService::default()),
            ledger: Arc::new(MockNotificationLedger::default()),
            translations: Arc::new(MockTranslationCache::default()),
            control: Arc::new(MockControlStore::default()),
            generator: Arc::new(MockQuestionGenerator::default()),
            email: Arc::new(MockEmailService::default()),
            push: Arc::new(MockPushService::default()),
        }
    }
}

impl TestDeps {
    pub fn deps(&self) -> WorkerDeps {
        WorkerDeps {
            users: self.users.clone(),
            questions: self.questions.clone(),
            hints: self.hints.clone(),
            daily: self.daily.clone(),
            stories: self.stories.clone(),
            ledger: self.ledger.clone(),
            translations: self.translations.clone(),
            control: self.control.clone(),
            generator: self.generator.clone(),
            email: self.email.clone(),
            push: self.push.clone(),
        }
    }
}
