pub mod models;
pub mod store;

pub use models::DailyAssignment;
pub use store::{DailyScheduler, PgDailyScheduler};
