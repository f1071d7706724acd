mod schema;
mod models;
mod store;

pub use schema::Database;
pub use models::{CategoryType, TargetingCategory, Recommendation, RecommendationRecord, UNKNOWN_SIZE};
pub use store::{CategoryStore, RecommendationLog, MemoryStore, StoreError, StoreResult, name_matches};
