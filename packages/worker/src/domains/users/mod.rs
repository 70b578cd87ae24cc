pub mod models;
pub mod store;

pub use models::{ApiKey, DeviceToken, LearningPreferences, User, DEFAULT_FRESH_QUESTION_RATIO};
pub use store::{PgUserStore, UserStore};
