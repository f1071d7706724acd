// =============================================================================
// Category Type Classification
// =============================================================================
//
// Decides whether an imported record is a demographic, interest or behavior.
// Resolution order, first hit wins:
// 1. curated type on the record ("interests", "Behaviour", ...)
// 2. the pinned table below, keyed by source category id
// 3. Meta's own targeting type ("life_events", "family_statuses", ...)
// 4. the root of the record's path ("Demographics" > ...)
// 5. the `{type}-` prefix of a generated id
//
// Names are never substring-matched. Earlier import runs did that and filed
// entries like "Drivers education" under demographics.

use crate::db::CategoryType;

/// Bump when the pinned table changes so re-imports can be told apart
pub const CLASSIFICATION_VERSION: &str = "2024.06.1";

/// Source ids whose Meta type is missing or misleading in browse dumps
const PINNED_TYPES: &[(&str, CategoryType)] = &[
    // Frequent travelers, exported without a type
    ("6002714895372", CategoryType::Behaviors),
    // Small business owners, exported as "interests"
    ("6002714898572", CategoryType::Behaviors),
    // Facebook page admins
    ("6002714898772", CategoryType::Behaviors),
    // Away from family, exported as "interests"
    ("6003053860372", CategoryType::Demographics),
    // Newly engaged (3 months)
    ("6002714398772", CategoryType::Demographics),
    // Lives abroad, listed under demographics in older dumps
    ("6015559470583", CategoryType::Behaviors),
];

/// Meta targeting `type` values and the taxonomy branch they live in
const META_TYPES: &[(&str, CategoryType)] = &[
    ("interests", CategoryType::Interests),
    ("behaviors", CategoryType::Behaviors),
    ("family_statuses", CategoryType::Demographics),
    ("life_events", CategoryType::Demographics),
    ("education_statuses", CategoryType::Demographics),
    ("education_schools", CategoryType::Demographics),
    ("education_majors", CategoryType::Demographics),
    ("work_employers", CategoryType::Demographics),
    ("work_positions", CategoryType::Demographics),
    ("industries", CategoryType::Demographics),
    ("income", CategoryType::Demographics),
    ("relationship_statuses", CategoryType::Demographics),
];

/// Pinned type for a source id
pub fn pinned_type(source_id: &str) -> Option<CategoryType> {
    PINNED_TYPES
        .iter()
        .find(|(id, _)| *id == source_id)
        .map(|(_, t)| *t)
}

/// Taxonomy branch for a Meta targeting type
pub fn meta_type(meta_type: &str) -> Option<CategoryType> {
    let wanted = meta_type.trim().to_lowercase();
    META_TYPES
        .iter()
        .find(|(name, _)| *name == wanted)
        .map(|(_, t)| *t)
}

/// Type from a generated id such as `behaviors-frequent-travelers`
pub fn type_from_id_prefix(id: &str) -> Option<CategoryType> {
    CategoryType::ALL
        .into_iter()
        .find(|t| id == t.as_str() || id.starts_with(&format!("{}-", t.as_str())))
}

/// Inputs available when classifying one record
#[derive(Debug, Default, Clone, Copy)]
pub struct TypeHints<'a> {
    pub explicit: Option<&'a str>,
    pub meta_type: Option<&'a str>,
    pub source_id: Option<&'a str>,
    pub root_name: Option<&'a str>,
}

pub fn resolve_type(hints: TypeHints<'_>) -> Option<CategoryType> {
    hints
        .explicit
        .and_then(CategoryType::parse_loose)
        .or_else(|| hints.source_id.and_then(pinned_type))
        .or_else(|| hints.meta_type.and_then(meta_type))
        .or_else(|| hints.root_name.and_then(CategoryType::parse_loose))
        .or_else(|| hints.source_id.and_then(type_from_id_prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_type_wins() {
        let hints = TypeHints {
            explicit: Some("Behaviour"),
            meta_type: Some("life_events"),
            source_id: Some("6003053860372"),
            root_name: Some("Interests"),
        };
        assert_eq!(resolve_type(hints), Some(CategoryType::Behaviors));
    }

    #[test]
    fn test_meta_type_mapping() {
        let hints = TypeHints { meta_type: Some("life_events"), ..Default::default() };
        assert_eq!(resolve_type(hints), Some(CategoryType::Demographics));
        assert_eq!(meta_type("FAMILY_STATUSES"), Some(CategoryType::Demographics));
        assert_eq!(meta_type("unknown_kind"), None);
    }

    #[test]
    fn test_pinned_table_overrides_meta_type() {
        let hints = TypeHints {
            explicit: None,
            meta_type: Some("interests"),
            source_id: Some("6002714895372"),
            root_name: Some("Interests"),
        };
        assert_eq!(resolve_type(hints), Some(CategoryType::Behaviors));
    }

    #[test]
    fn test_root_name_then_prefix() {
        let hints = TypeHints { root_name: Some("Demographics"), ..Default::default() };
        assert_eq!(resolve_type(hints), Some(CategoryType::Demographics));

        let hints = TypeHints { source_id: Some("behaviors-commuters"), ..Default::default() };
        assert_eq!(resolve_type(hints), Some(CategoryType::Behaviors));
        assert_eq!(type_from_id_prefix("interests"), Some(CategoryType::Interests));
        assert_eq!(type_from_id_prefix("interestsfoo"), None);
    }
}
