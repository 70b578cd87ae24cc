pub mod models;
pub mod service;

pub use models::{Story, StorySection};
pub use service::{PgStoryService, StoryError, StoryService};
