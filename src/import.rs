//! Offline ingestion of taxonomy data
//!
//! Two input shapes are supported:
//! - category record batches (the API wire format, fields may be missing)
//! - Meta detailed-targeting browse dumps, where each entry carries its full
//!   `path` and audience bounds instead of a parent reference
//!
//! Both produce plain `TargetingCategory` records ready for `bulk_insert`.

use crate::classification::{self, TypeHints};
use crate::db::{CategoryType, TargetingCategory, UNKNOWN_SIZE};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Deepest level an imported record may sit at. Meta's taxonomy stops at 5.
pub const MAX_LEVEL: i32 = 10;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No categories found in payload")]
    Empty,

    #[error("Record {index}: {reason}")]
    InvalidRecord { index: usize, reason: String },
}

/// Lowercase, runs of anything non-alphanumeric become one dash
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// Conventional id for authored categories
pub fn category_id(category_type: CategoryType, name: &str) -> String {
    format!("{}-{}", category_type.as_str(), slugify(name))
}

/// 1234567 -> "1,234,567"
pub fn format_with_commas(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Size marker from Meta audience bounds
pub fn format_size(lower: Option<u64>, upper: Option<u64>) -> String {
    match (lower, upper) {
        (_, Some(upper)) if upper < 1000 => "Below 1000".to_string(),
        (Some(lower), Some(upper)) if lower == upper => format_with_commas(lower),
        (Some(lower), Some(upper)) => {
            format!("{} - {}", format_with_commas(lower), format_with_commas(upper))
        }
        (Some(n), None) | (None, Some(n)) => format_with_commas(n),
        (None, None) => UNKNOWN_SIZE.to_string(),
    }
}

fn size_from_value(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Number(n)) => match n.as_u64() {
            Some(n) => format_with_commas(n),
            None => n.to_string(),
        },
        _ => UNKNOWN_SIZE.to_string(),
    }
}

/// Record as found in hand-authored batches: everything but the name is optional
#[derive(Debug, Deserialize)]
struct RawRecord {
    id: Option<String>,
    name: Option<String>,
    #[serde(rename = "parentId", alias = "parent_id")]
    parent_id: Option<String>,
    level: Option<i32>,
    size: Option<Value>,
    #[serde(rename = "categoryType", alias = "category_type", alias = "type")]
    category_type: Option<String>,
}

/// Accept a bare array or an object wrapping it under one of `keys`
fn unwrap_array(value: Value, keys: &[&str]) -> Result<Vec<Value>, ImportError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => keys
            .iter()
            .find_map(|k| match map.remove(*k) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .ok_or(ImportError::Empty),
        _ => Err(ImportError::Empty),
    }
}

/// Parse a batch of category records.
///
/// Missing ids become `{type}-{slug}`, missing levels are derived from the
/// parent chain inside the batch, missing types go through the classifier and
/// finally default to interests.
pub fn parse_records(json: &str) -> Result<Vec<TargetingCategory>, ImportError> {
    let items = unwrap_array(serde_json::from_str(json)?, &["categories", "data"])?;
    if items.is_empty() {
        return Err(ImportError::Empty);
    }

    let raws = items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let raw: RawRecord = serde_json::from_value(item).map_err(|e| {
                ImportError::InvalidRecord { index, reason: e.to_string() }
            })?;
            match raw.name.as_deref().map(str::trim) {
                Some(name) if !name.is_empty() => Ok(raw),
                _ => Err(ImportError::InvalidRecord { index, reason: "missing name".to_string() }),
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    let by_id: HashMap<&str, &RawRecord> = raws
        .iter()
        .filter_map(|r| r.id.as_deref().map(|id| (id, r)))
        .collect();

    // Walk up inside the batch to find the root record, bounded against cycles
    let root_of = |raw: &RawRecord| -> Option<String> {
        let mut current = raw;
        for _ in 0..=MAX_LEVEL {
            match current.parent_id.as_deref().filter(|p| !p.is_empty()) {
                None => return current.name.clone(),
                Some(parent) => current = *by_id.get(parent)?,
            }
        }
        None
    };

    // Chain length inside the batch, stops one past MAX_LEVEL or at a cycle
    let depth_of = |raw: &RawRecord| -> i32 {
        let mut depth = 1;
        let mut current = raw;
        let mut seen: HashSet<&str> = HashSet::new();
        while let Some(parent) = current.parent_id.as_deref().filter(|p| !p.is_empty()) {
            if depth > MAX_LEVEL || !seen.insert(parent) {
                break;
            }
            depth += 1;
            match by_id.get(parent) {
                Some(next) => current = *next,
                None => break,
            }
        }
        depth
    };

    let categories = raws
        .iter()
        .enumerate()
        .map(|(index, raw)| {
            let depth = depth_of(raw);
            let level = raw.level.unwrap_or(depth);
            if depth > MAX_LEVEL || !(1..=MAX_LEVEL).contains(&level) {
                return Err(ImportError::InvalidRecord {
                    index,
                    reason: format!("level {} is outside 1..={}", level.max(depth), MAX_LEVEL),
                });
            }

            let name = raw.name.as_deref().unwrap_or_default().trim().to_string();
            let root_name = root_of(raw);
            let category_type = classification::resolve_type(TypeHints {
                explicit: raw.category_type.as_deref(),
                meta_type: raw.category_type.as_deref(),
                source_id: raw.id.as_deref(),
                root_name: root_name.as_deref(),
            })
            .unwrap_or(CategoryType::Interests);

            Ok(TargetingCategory {
                id: raw
                    .id
                    .clone()
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| category_id(category_type, &name)),
                parent_id: raw.parent_id.clone().filter(|p| !p.is_empty()),
                level,
                size: size_from_value(raw.size.as_ref()),
                category_type,
                name,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(categories)
}

/// One entry of a Meta detailed-targeting browse dump
#[derive(Debug, Deserialize)]
struct MetaEntry {
    id: String,
    name: String,
    #[serde(rename = "type")]
    meta_type: Option<String>,
    #[serde(default)]
    path: Vec<String>,
    audience_size_lower_bound: Option<u64>,
    audience_size_upper_bound: Option<u64>,
    audience_size: Option<u64>,
}

/// Convert a Meta browse dump into records.
///
/// Every prefix of an entry's path becomes a category. Intermediate nodes get
/// ids built from their whole path (`{type}-{slug}-{slug}`) so equal names in
/// different branches stay apart; each is emitted once. The entry itself
/// keeps Meta's id and carries the audience size.
pub fn parse_meta_dump(json: &str) -> Result<Vec<TargetingCategory>, ImportError> {
    let items = unwrap_array(serde_json::from_str(json)?, &["data", "categories"])?;
    if items.is_empty() {
        return Err(ImportError::Empty);
    }

    let mut out = Vec::new();
    let mut emitted: HashSet<String> = HashSet::new();

    for (index, item) in items.into_iter().enumerate() {
        let entry: MetaEntry = serde_json::from_value(item)
            .map_err(|e| ImportError::InvalidRecord { index, reason: e.to_string() })?;

        let mut path: Vec<&str> = entry.path.iter().map(|s| s.trim()).filter(|s| !s.is_empty()).collect();
        let root_name = path.first().copied();
        let category_type = classification::resolve_type(TypeHints {
            explicit: None,
            meta_type: entry.meta_type.as_deref(),
            source_id: Some(&entry.id),
            root_name,
        })
        .unwrap_or(CategoryType::Interests);

        // The branch root is implied by the type; drop it when the path spells it out
        if path.first().and_then(|p| CategoryType::parse_loose(p)) == Some(category_type) {
            path.remove(0);
        }
        if path.last().map(|last| last.eq_ignore_ascii_case(&entry.name)) == Some(true) {
            path.pop();
        }
        // root + path + the entry itself
        if path.len() as i32 + 2 > MAX_LEVEL {
            return Err(ImportError::InvalidRecord {
                index,
                reason: format!("path is deeper than {} levels", MAX_LEVEL),
            });
        }

        let root_id = category_type.as_str().to_string();
        if emitted.insert(root_id.clone()) {
            out.push(TargetingCategory::new(
                root_id.clone(),
                category_type.root_name(),
                None,
                1,
                UNKNOWN_SIZE,
                category_type,
            ));
        }

        let mut parent_id = root_id;
        let mut level = 1;
        for segment in path {
            level += 1;
            let id = format!("{}-{}", parent_id, slugify(segment));
            if emitted.insert(id.clone()) {
                out.push(TargetingCategory::new(
                    id.clone(),
                    segment,
                    Some(parent_id.as_str()),
                    level,
                    UNKNOWN_SIZE,
                    category_type,
                ));
            }
            parent_id = id;
        }

        let size = match (entry.audience_size_lower_bound, entry.audience_size_upper_bound) {
            (None, None) => format_size(entry.audience_size, None),
            (lower, upper) => format_size(lower, upper),
        };
        // A later duplicate of the same Meta id overwrites downstream, like any batch
        emitted.insert(entry.id.clone());
        out.push(TargetingCategory::new(
            entry.id,
            entry.name.trim(),
            Some(parent_id.as_str()),
            level + 1,
            size,
            category_type,
        ));
    }

    log::info!("[Import] Meta dump produced {} categories", out.len());
    Ok(out)
}
