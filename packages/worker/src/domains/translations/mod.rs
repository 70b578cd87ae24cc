pub mod cache;

pub use cache::{PgTranslationCache, TranslationCache, TranslationCacheEntry};
