//! Storage capabilities for the taxonomy and the recommendation history.
//!
//! Route handlers receive these as trait objects so the backend (bundled
//! in-memory taxonomy or SQLite) is chosen once at startup and tests can
//! inject their own.

use super::models::{RecommendationRecord, TargetingCategory};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Read access plus append-only ingestion for the category taxonomy
pub trait CategoryStore: Send + Sync {
    /// All categories in source order
    fn list(&self) -> StoreResult<Vec<TargetingCategory>>;

    /// Categories whose parent matches exactly; `None` selects the roots
    fn get_by_parent(&self, parent_id: Option<&str>) -> StoreResult<Vec<TargetingCategory>>;

    fn get_by_id(&self, id: &str) -> StoreResult<Option<TargetingCategory>>;

    /// Case-insensitive substring match on the name, source order
    fn search(&self, query: &str) -> StoreResult<Vec<TargetingCategory>>;

    /// Insert or overwrite by id
    fn create(&self, category: &TargetingCategory) -> StoreResult<()>;

    /// Insert or overwrite a batch, returns the number of records written
    fn bulk_insert(&self, categories: &[TargetingCategory]) -> StoreResult<usize>;

    fn count(&self) -> StoreResult<usize>;
}

/// Append log of generated recommendations
pub trait RecommendationLog: Send + Sync {
    fn save_recommendation(&self, record: &RecommendationRecord) -> StoreResult<()>;

    /// Newest first
    fn list_recommendations(&self, limit: Option<usize>) -> StoreResult<Vec<RecommendationRecord>>;
}

/// Case-insensitive substring test shared by the backends
pub fn name_matches(name: &str, query: &str) -> bool {
    name.to_lowercase().contains(&query.to_lowercase())
}

#[derive(Default)]
struct MemoryInner {
    categories: Vec<TargetingCategory>,
    index: HashMap<String, usize>,
    history: Vec<RecommendationRecord>,
}

impl MemoryInner {
    fn upsert(&mut self, category: &TargetingCategory) {
        match self.index.get(&category.id) {
            Some(&pos) => self.categories[pos] = category.clone(),
            None => {
                self.index.insert(category.id.clone(), self.categories.len());
                self.categories.push(category.clone());
            }
        }
    }
}

/// In-memory backend, normally seeded from the bundled taxonomy asset
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_categories(categories: &[TargetingCategory]) -> Self {
        let mut inner = MemoryInner::default();
        for category in categories {
            inner.upsert(category);
        }
        Self { inner: RwLock::new(inner) }
    }

    fn read<T>(&self, f: impl FnOnce(&MemoryInner) -> T) -> StoreResult<T> {
        let guard = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&guard))
    }

    fn write<T>(&self, f: impl FnOnce(&mut MemoryInner) -> T) -> StoreResult<T> {
        let mut guard = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&mut guard))
    }
}

impl CategoryStore for MemoryStore {
    fn list(&self) -> StoreResult<Vec<TargetingCategory>> {
        self.read(|inner| inner.categories.clone())
    }

    fn get_by_parent(&self, parent_id: Option<&str>) -> StoreResult<Vec<TargetingCategory>> {
        self.read(|inner| {
            inner
                .categories
                .iter()
                .filter(|c| c.parent() == parent_id)
                .cloned()
                .collect()
        })
    }

    fn get_by_id(&self, id: &str) -> StoreResult<Option<TargetingCategory>> {
        self.read(|inner| inner.index.get(id).map(|&pos| inner.categories[pos].clone()))
    }

    fn search(&self, query: &str) -> StoreResult<Vec<TargetingCategory>> {
        self.read(|inner| {
            inner
                .categories
                .iter()
                .filter(|c| name_matches(&c.name, query))
                .cloned()
                .collect()
        })
    }

    fn create(&self, category: &TargetingCategory) -> StoreResult<()> {
        self.write(|inner| inner.upsert(category))
    }

    fn bulk_insert(&self, categories: &[TargetingCategory]) -> StoreResult<usize> {
        self.write(|inner| {
            for category in categories {
                inner.upsert(category);
            }
            categories.len()
        })
    }

    fn count(&self) -> StoreResult<usize> {
        self.read(|inner| inner.categories.len())
    }
}

impl RecommendationLog for MemoryStore {
    fn save_recommendation(&self, record: &RecommendationRecord) -> StoreResult<()> {
        self.write(|inner| inner.history.push(record.clone()))
    }

    fn list_recommendations(&self, limit: Option<usize>) -> StoreResult<Vec<RecommendationRecord>> {
        self.read(|inner| {
            inner
                .history
                .iter()
                .rev()
                .take(limit.unwrap_or(usize::MAX))
                .cloned()
                .collect()
        })
    }
}
