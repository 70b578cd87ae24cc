pub mod hints;
pub mod models;
pub mod store;
pub mod variety;

pub use hints::{GenerationHint, HintStore, PgHintStore};
pub use models::{GeneratedQuestion, Question, VarietyElements, WordOfTheDay};
pub use store::{PgQuestionStore, QuestionStore};
pub use variety::{PriorityGenerationData, VarietySelector};
