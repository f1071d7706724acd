//! Meta targeting spec construction
//!
//! Selected categories arrive in groups. Categories inside a group are
//! OR-combined and groups are AND-combined, which maps directly onto Meta's
//! `flexible_spec`: one entry per group, AND across entries.

use crate::db::{CategoryStore, CategoryType, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ad targeting starts at 18; Meta treats 65 as "65+"
pub const MIN_AGE: u8 = 18;
pub const MAX_AGE: u8 = 65;

/// A selected item: a store category id, or a Meta entity taken from a live search
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum GroupItem {
    CategoryId(String),
    Entity {
        id: String,
        name: String,
        #[serde(rename = "type")]
        meta_type: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TargetingGroup {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(alias = "categoryIds", alias = "categories")]
    pub items: Vec<GroupItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetingEntity {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GeoLocations {
    pub countries: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetingSpec {
    pub geo_locations: GeoLocations,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_min: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_max: Option<u8>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub flexible_spec: Vec<BTreeMap<String, Vec<TargetingEntity>>>,
}

/// A selected item that did not make it into the spec
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SkippedItem {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuiltSpec {
    pub spec: TargetingSpec,
    pub skipped: Vec<SkippedItem>,
}

/// `flexible_spec` key for store categories of each type
pub fn spec_key(category_type: CategoryType) -> &'static str {
    match category_type {
        CategoryType::Interests => "interests",
        CategoryType::Behaviors => "behaviors",
        CategoryType::Demographics => "life_events",
    }
}

/// Meta only accepts its own numeric ids; slug ids from authored batches
/// have no counterpart there.
pub fn is_meta_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_digit())
}

/// Parse "US", "US, CA" or "United States" style focus strings into
/// ISO country codes. Unknown names are dropped; empty result means worldwide.
pub fn parse_countries(focus: Option<&str>) -> Vec<String> {
    let Some(focus) = focus else { return Vec::new() };
    focus
        .split(|c| c == ',' || c == ';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| {
            if s.len() == 2 && s.chars().all(|c| c.is_ascii_alphabetic()) {
                Some(s.to_uppercase())
            } else {
                crate::meta_client::country_code(s).map(str::to_string)
            }
        })
        .collect()
}

pub fn build_targeting_spec(
    store: &dyn CategoryStore,
    groups: &[TargetingGroup],
    countries: Vec<String>,
    age_range: Option<(u8, u8)>,
) -> Result<BuiltSpec, StoreError> {
    let mut flexible_spec = Vec::new();
    let mut skipped = Vec::new();

    for group in groups {
        let mut entry: BTreeMap<String, Vec<TargetingEntity>> = BTreeMap::new();
        for item in &group.items {
            match item {
                GroupItem::Entity { id, name, meta_type } => {
                    let key = meta_type.clone().unwrap_or_else(|| "interests".to_string());
                    entry.entry(key).or_default().push(TargetingEntity {
                        id: id.clone(),
                        name: name.clone(),
                    });
                }
                GroupItem::CategoryId(id) => match store.get_by_id(id)? {
                    None => skipped.push(SkippedItem {
                        id: id.clone(),
                        reason: "unknown category".to_string(),
                    }),
                    Some(category) if !is_meta_id(&category.id) => skipped.push(SkippedItem {
                        id: id.clone(),
                        reason: "no Meta targeting id".to_string(),
                    }),
                    Some(category) => {
                        entry
                            .entry(spec_key(category.category_type).to_string())
                            .or_default()
                            .push(TargetingEntity { id: category.id, name: category.name });
                    }
                },
            }
        }
        if !entry.is_empty() {
            flexible_spec.push(entry);
        }
    }

    let (age_min, age_max) = match age_range {
        Some((min, max)) => {
            let min = min.clamp(MIN_AGE, MAX_AGE);
            let max = max.clamp(min, MAX_AGE);
            (Some(min), Some(max))
        }
        None => (None, None),
    };

    let countries = if countries.is_empty() { vec!["US".to_string()] } else { countries };

    Ok(BuiltSpec {
        spec: TargetingSpec {
            geo_locations: GeoLocations { countries },
            age_min,
            age_max,
            flexible_spec,
        },
        skipped,
    })
}

/// "25-34", "18 to 24", "45+" -> inclusive age range
pub fn parse_age_range(text: &str) -> Option<(u8, u8)> {
    let numbers: Vec<u8> = text
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect();
    match numbers.as_slice() {
        [min, max, ..] if min <= max => Some((*min, *max)),
        [min] if text.contains('+') => Some((*min, MAX_AGE)),
        _ => None,
    }
}
