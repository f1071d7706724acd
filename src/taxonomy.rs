//! Bundled taxonomy asset
//!
//! `data/taxonomy.json` is the pinned, versioned category set. It is compiled
//! into the binary and used to seed empty stores.

use crate::db::{CategoryStore, StoreError, TargetingCategory};
use serde::Deserialize;

const BUNDLED_TAXONOMY: &str = include_str!("../data/taxonomy.json");

#[derive(Debug, Clone, Deserialize)]
pub struct TaxonomyAsset {
    pub version: String,
    #[serde(default)]
    pub source: Option<String>,
    pub categories: Vec<TargetingCategory>,
}

pub fn bundled() -> Result<TaxonomyAsset, serde_json::Error> {
    serde_json::from_str(BUNDLED_TAXONOMY)
}

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("Bundled taxonomy is invalid: {0}")]
    Asset(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Load the bundled taxonomy into `store` if it holds no categories yet.
/// Returns the number of records written.
pub fn seed_if_empty(store: &dyn CategoryStore) -> Result<usize, SeedError> {
    if store.count()? > 0 {
        return Ok(0);
    }
    let asset = bundled()?;
    let written = store.bulk_insert(&asset.categories)?;
    log::info!(
        "[Store] Seeded {} categories from bundled taxonomy v{}",
        written,
        asset.version
    );
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CategoryType, MemoryStore};
    use crate::hierarchy;
    use std::collections::HashSet;

    #[test]
    fn test_bundled_asset_is_consistent() {
        let asset = bundled().unwrap();
        assert!(!asset.version.is_empty());

        let ids: HashSet<_> = asset.categories.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids.len(), asset.categories.len(), "duplicate ids in bundled taxonomy");

        // every record resolves to a root, parents sit one level up
        assert!(hierarchy::orphans(&asset.categories).is_empty());
        for c in &asset.categories {
            if let Some(parent) = c.parent() {
                let parent = asset.categories.iter().find(|p| p.id == parent).unwrap();
                assert_eq!(parent.level, c.level - 1, "{}", c.id);
                assert_eq!(parent.category_type, c.category_type, "{}", c.id);
            }
        }

        let roots: Vec<_> = hierarchy::build_tree(&asset.categories)
            .into_iter()
            .map(|n| n.category.category_type)
            .collect();
        assert_eq!(roots, vec![CategoryType::Demographics, CategoryType::Interests, CategoryType::Behaviors]);
    }

    #[test]
    fn test_bundled_asset_covers_full_taxonomy() {
        let asset = bundled().unwrap();
        assert!(asset.categories.len() >= 600, "{} categories", asset.categories.len());
        assert_eq!(asset.categories.iter().map(|c| c.level).max(), Some(5));
        for t in CategoryType::ALL {
            assert!(asset.categories.iter().filter(|c| c.category_type == t).count() > 100, "{:?}", t);
        }
        // the recommendation prompt carries the whole taxonomy
        let non_roots = asset.categories.iter().filter(|c| !c.is_root()).count();
        assert!(non_roots <= crate::recommendations::MAX_CATALOGUE_ENTRIES);
    }

    #[test]
    fn test_seed_only_when_empty() {
        let store = MemoryStore::new();
        let written = seed_if_empty(&store).unwrap();
        assert!(written >= 600);
        assert_eq!(seed_if_empty(&store).unwrap(), 0);
        assert_eq!(store.count().unwrap(), written);
    }
}
