use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CategoryType {
    Interests,
    Behaviors,
    Demographics,
}

impl CategoryType {
    pub const ALL: [CategoryType; 3] = [
        CategoryType::Demographics,
        CategoryType::Interests,
        CategoryType::Behaviors,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryType::Interests => "interests",
            CategoryType::Behaviors => "behaviors",
            CategoryType::Demographics => "demographics",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "interests" => Some(CategoryType::Interests),
            "behaviors" => Some(CategoryType::Behaviors),
            "demographics" => Some(CategoryType::Demographics),
            _ => None,
        }
    }

    /// Accepts the loose spellings LLMs and Meta dumps use ("Interest",
    /// "behaviours", "demographic").
    pub fn parse_loose(s: &str) -> Option<Self> {
        let lower = s.trim().to_lowercase();
        match lower.as_str() {
            "interests" | "interest" => Some(CategoryType::Interests),
            "behaviors" | "behavior" | "behaviours" | "behaviour" => Some(CategoryType::Behaviors),
            "demographics" | "demographic" => Some(CategoryType::Demographics),
            _ => None,
        }
    }

    /// Display name of the level-1 root for this type
    pub fn root_name(&self) -> &'static str {
        match self {
            CategoryType::Interests => "Interests",
            CategoryType::Behaviors => "Behaviors",
            CategoryType::Demographics => "Demographics",
        }
    }
}

// Taxonomy record. Wire format is camelCase:
// {id, name, parentId, level, size, categoryType}
// level: 1 = root (Demographics / Interests / Behaviors), increases with nesting
// size: free-form on purpose, source data mixes numbers, ranges and markers

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetingCategory {
    pub id: String,
    pub name: String,
    #[serde(rename = "parentId", default)]
    pub parent_id: Option<String>,
    pub level: i32,
    #[serde(default = "default_size")]
    pub size: String,
    #[serde(rename = "categoryType")]
    pub category_type: CategoryType,
}

/// Size marker for categories without audience data
pub const UNKNOWN_SIZE: &str = "Unknown";

fn default_size() -> String {
    UNKNOWN_SIZE.to_string()
}

impl TargetingCategory {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        parent_id: Option<&str>,
        level: i32,
        size: impl Into<String>,
        category_type: CategoryType,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent_id: parent_id.map(|s| s.to_string()),
            level,
            size: size.into(),
            category_type,
        }
    }

    /// Empty-string parents in hand-authored batches mean "no parent"
    pub fn parent(&self) -> Option<&str> {
        self.parent_id.as_deref().filter(|p| !p.is_empty())
    }

    pub fn is_root(&self) -> bool {
        self.parent().is_none()
    }
}

/// One recommended category as returned to the client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub category_type: String,
    pub justification: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breadcrumbs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_reach: Option<String>,
}

/// Entry in the recommendation history log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationRecord {
    pub id: String,
    pub user_input: String,
    pub budget_range: Option<String>,
    pub geographic_focus: Option<String>,
    pub campaign_goal: Option<String>,
    pub recommendations: Vec<Recommendation>,
    pub created_at: String,
}
