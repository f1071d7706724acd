//! Business description -> recommended targeting categories
//!
//! The questionnaire (or free text) is validated up front; nothing reaches the
//! LLM unless it passes. The model picks categories from the store catalogue
//! and the answer is enriched with breadcrumbs and size before it is logged.

use crate::ai_client::{self, AiError, LlmClient};
use crate::db::{
    CategoryStore, CategoryType, Recommendation, RecommendationLog, RecommendationRecord, StoreError,
    TargetingCategory,
};
use crate::estimates::CampaignGoal;
use crate::hierarchy::CategoryIndex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashSet, VecDeque};
use thiserror::Error;

pub const MISSING_DESCRIPTION: &str = "Please provide a description of your business";
pub const GENERATION_FAILED: &str = "Failed to generate strategy. Please try again.";

/// Catalogue lines sent to the model; keeps prompts bounded for large imports.
/// The bundled taxonomy fits whole.
pub const MAX_CATALOGUE_ENTRIES: usize = 800;

#[derive(Debug, Error)]
pub enum RecommendationError {
    /// Client-side problem with the request, message is shown as-is
    #[error("{0}")]
    Invalid(String),

    #[error("Generation failed: {0}")]
    Generation(#[from] AiError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Monthly ad spend bracket
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BudgetRange {
    Under500,
    From500To2000,
    From2000To10000,
    Over10000,
}

impl BudgetRange {
    pub const ALL: [BudgetRange; 4] = [
        BudgetRange::Under500,
        BudgetRange::From500To2000,
        BudgetRange::From2000To10000,
        BudgetRange::Over10000,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetRange::Under500 => "under_500",
            BudgetRange::From500To2000 => "500_2000",
            BudgetRange::From2000To10000 => "2000_10000",
            BudgetRange::Over10000 => "over_10000",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BudgetRange::Under500 => "Under $500/month",
            BudgetRange::From500To2000 => "$500 - $2,000/month",
            BudgetRange::From2000To10000 => "$2,000 - $10,000/month",
            BudgetRange::Over10000 => "Over $10,000/month",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "under_500" | "low" | "small" => Some(BudgetRange::Under500),
            "500_2000" | "medium" => Some(BudgetRange::From500To2000),
            "2000_10000" | "high" | "large" => Some(BudgetRange::From2000To10000),
            "over_10000" | "enterprise" => Some(BudgetRange::Over10000),
            _ => None,
        }
    }
}

/// Body of `POST /api/recommendations/generate`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationRequest {
    pub business_type: Option<String>,
    pub product_service: Option<String>,
    pub target_age: Option<String>,
    pub budget: Option<String>,
    pub goal: Option<String>,
    pub user_input: Option<String>,
    pub budget_range: Option<String>,
    pub geographic_focus: Option<String>,
    pub campaign_goal: Option<String>,
}

/// A request that passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct Brief {
    pub description: String,
    pub target_age: Option<String>,
    pub budget: Option<BudgetRange>,
    pub goal: Option<CampaignGoal>,
    pub budget_range: Option<String>,
    pub geographic_focus: Option<String>,
    pub campaign_goal: Option<String>,
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

impl RecommendationRequest {
    pub fn validate(&self) -> Result<Brief, RecommendationError> {
        let description = match non_blank(&self.user_input) {
            Some(text) => text,
            None => {
                let mut lines = Vec::new();
                if let Some(business) = non_blank(&self.business_type) {
                    lines.push(format!("Business type: {}", business));
                }
                if let Some(product) = non_blank(&self.product_service) {
                    lines.push(format!("Product or service: {}", product));
                }
                if lines.is_empty() {
                    return Err(RecommendationError::Invalid(MISSING_DESCRIPTION.to_string()));
                }
                lines.join("\n")
            }
        };

        let budget = match non_blank(&self.budget) {
            Some(raw) => Some(BudgetRange::from_str(&raw).ok_or_else(|| {
                let allowed: Vec<_> = BudgetRange::ALL.iter().map(|b| b.as_str()).collect();
                RecommendationError::Invalid(format!(
                    "Invalid budget '{}'. Expected one of: {}",
                    raw,
                    allowed.join(", ")
                ))
            })?),
            None => None,
        };

        let goal = match non_blank(&self.goal) {
            Some(raw) => Some(CampaignGoal::from_str(&raw).ok_or_else(|| {
                let allowed: Vec<_> = CampaignGoal::ALL.iter().map(|g| g.as_str()).collect();
                RecommendationError::Invalid(format!(
                    "Invalid goal '{}'. Expected one of: {}",
                    raw,
                    allowed.join(", ")
                ))
            })?),
            None => None,
        };

        Ok(Brief {
            description,
            target_age: non_blank(&self.target_age),
            budget,
            goal,
            budget_range: non_blank(&self.budget_range).or_else(|| budget.map(|b| b.label().to_string())),
            geographic_focus: non_blank(&self.geographic_focus),
            campaign_goal: non_blank(&self.campaign_goal).or_else(|| goal.map(|g| g.as_str().to_string())),
        })
    }
}

/// `- id | name | type | Root > Branch > Leaf` for every non-root category
pub fn catalogue(index: &CategoryIndex<'_>) -> String {
    let entries: Vec<&TargetingCategory> = index.records().filter(|c| !c.is_root()).collect();
    let shown = if entries.len() > MAX_CATALOGUE_ENTRIES {
        log::warn!(
            "[AI] Catalogue has {} categories, sending {} sampled across types",
            entries.len(),
            MAX_CATALOGUE_ENTRIES
        );
        sample_by_type(&entries, MAX_CATALOGUE_ENTRIES)
    } else {
        entries
    };

    shown
        .iter()
        .map(|c| {
            format!(
                "- {} | {} | {} | {}",
                c.id,
                c.name,
                c.category_type.as_str(),
                index.breadcrumbs(&c.id).join(" > ")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Take entries round-robin across category types until `cap` is reached,
/// then restore source order. No type is starved by a large sibling type.
fn sample_by_type<'a>(entries: &[&'a TargetingCategory], cap: usize) -> Vec<&'a TargetingCategory> {
    let mut queues: Vec<VecDeque<&'a TargetingCategory>> = CategoryType::ALL
        .iter()
        .map(|t| entries.iter().copied().filter(|c| c.category_type == *t).collect())
        .collect();

    let mut picked: HashSet<&str> = HashSet::with_capacity(cap);
    while picked.len() < cap && queues.iter().any(|q| !q.is_empty()) {
        for queue in queues.iter_mut() {
            if picked.len() == cap {
                break;
            }
            if let Some(c) = queue.pop_front() {
                picked.insert(c.id.as_str());
            }
        }
    }

    entries.iter().copied().filter(|c| picked.contains(c.id.as_str())).collect()
}

pub fn build_prompt(brief: &Brief, index: &CategoryIndex<'_>) -> String {
    let mut context = vec![format!("Business description:\n{}", brief.description)];
    if let Some(age) = &brief.target_age {
        context.push(format!("Target age: {}", age));
    }
    if let Some(budget) = &brief.budget_range {
        context.push(format!("Budget: {}", budget));
    }
    if let Some(goal) = &brief.campaign_goal {
        context.push(format!("Campaign goal: {}", goal));
    }
    if let Some(geo) = &brief.geographic_focus {
        context.push(format!("Geographic focus: {}", geo));
    }

    format!(
        r#"You are a Meta Ads targeting strategist.

{context}

Choose 6 to 12 targeting categories from the catalogue below that best reach this business's customers. Mix interests, behaviors and demographics where it makes sense. Use the exact id and name from the catalogue.

Catalogue (id | name | type | path):
{catalogue}

Respond with JSON only:
{{"recommendations": [{{"id": "...", "name": "...", "type": "interests|behaviors|demographics", "justification": "one or two sentences"}}]}}"#,
        context = context.join("\n"),
        catalogue = catalogue(index),
    )
}

/// JSON schema handed to the provider for structured output
pub fn response_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "recommendations": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "id": {"type": "string"},
                        "name": {"type": "string"},
                        "type": {"type": "string", "enum": ["interests", "behaviors", "demographics"]},
                        "justification": {"type": "string"}
                    },
                    "required": ["id", "name", "type", "justification"]
                }
            }
        },
        "required": ["recommendations"]
    })
}

#[derive(Debug, Deserialize)]
struct RawRecommendation {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "type", alias = "categoryType", default)]
    category_type: Option<String>,
    #[serde(default, alias = "reason")]
    justification: Option<String>,
}

/// Accepts `{"recommendations": [...]}` or a bare array. Items without a name
/// or id are dropped; an answer with nothing usable is malformed.
pub fn parse_recommendations(value: Value) -> Result<Vec<Recommendation>, AiError> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("recommendations") {
            Some(Value::Array(items)) => items,
            _ => return Err(AiError::Malformed("missing recommendations array".to_string())),
        },
        _ => return Err(AiError::Malformed("expected an object".to_string())),
    };

    let recommendations: Vec<Recommendation> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<RawRecommendation>(item).ok())
        .filter_map(|raw| {
            let name = raw.name.filter(|n| !n.trim().is_empty());
            let id = raw.id.filter(|i| !i.trim().is_empty());
            if name.is_none() && id.is_none() {
                return None;
            }
            Some(Recommendation {
                id: id.clone().unwrap_or_default(),
                name: name.or(id).unwrap_or_default(),
                category_type: raw.category_type.unwrap_or_default(),
                justification: raw.justification.unwrap_or_default(),
                breadcrumbs: None,
                estimated_reach: None,
            })
        })
        .collect();

    if recommendations.is_empty() {
        return Err(AiError::Malformed("no usable recommendations".to_string()));
    }
    Ok(recommendations)
}

/// Resolve each recommendation against the store, by id then by name
pub fn enrich(recommendations: Vec<Recommendation>, index: &CategoryIndex<'_>) -> Vec<Recommendation> {
    recommendations
        .into_iter()
        .map(|mut rec| {
            let found: Option<&TargetingCategory> =
                index.get(&rec.id).or_else(|| index.find_by_name(&rec.name));
            match found {
                Some(category) => {
                    rec.id = category.id.clone();
                    rec.name = category.name.clone();
                    rec.category_type = category.category_type.as_str().to_string();
                    rec.breadcrumbs = Some(index.breadcrumbs(&category.id));
                    rec.estimated_reach = Some(category.size.clone());
                }
                None => {
                    if let Some(t) = CategoryType::parse_loose(&rec.category_type) {
                        rec.category_type = t.as_str().to_string();
                    }
                }
            }
            rec
        })
        .collect()
}

/// Full flow: validate, prompt, parse, enrich, log.
pub async fn generate(
    request: &RecommendationRequest,
    store: &dyn CategoryStore,
    history: &dyn RecommendationLog,
    llm: &dyn LlmClient,
) -> Result<RecommendationRecord, RecommendationError> {
    let brief = request.validate()?;

    let categories = store.list()?;
    let index = CategoryIndex::new(&categories);
    let prompt = build_prompt(&brief, &index);

    let schema = response_schema();
    let text = llm.generate(&prompt, Some(&schema)).await?;
    let parsed = parse_recommendations(ai_client::parse_json_response(&text)?)?;
    let recommendations = enrich(parsed, &index);

    let record = RecommendationRecord {
        id: uuid::Uuid::new_v4().to_string(),
        user_input: brief.description,
        budget_range: brief.budget_range,
        geographic_focus: brief.geographic_focus,
        campaign_goal: brief.campaign_goal,
        recommendations,
        created_at: chrono::Utc::now().to_rfc3339(),
    };
    history.save_recommendation(&record)?;
    log::info!(
        "[AI] Generated {} recommendations ({})",
        record.recommendations.len(),
        record.id
    );
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai_client::tests::MockLlm;
    use crate::db::MemoryStore;

    fn store() -> MemoryStore {
        MemoryStore::with_categories(&[
            TargetingCategory::new("interests", "Interests", None, 1, "Unknown", CategoryType::Interests),
            TargetingCategory::new("interests-fitness", "Fitness and wellness", Some("interests"), 2, "Unknown", CategoryType::Interests),
            TargetingCategory::new("interests-yoga", "Yoga", Some("interests-fitness"), 3, "312,000,000", CategoryType::Interests),
            TargetingCategory::new("behaviors", "Behaviors", None, 1, "Unknown", CategoryType::Behaviors),
            TargetingCategory::new("behaviors-travelers", "Frequent travelers", Some("behaviors"), 2, "1.2M - 1.6M", CategoryType::Behaviors),
        ])
    }

    fn request(user_input: &str) -> RecommendationRequest {
        RecommendationRequest { user_input: Some(user_input.to_string()), ..Default::default() }
    }

    const REPLY: &str = r#"```json
{"recommendations": [
  {"id": "interests-yoga", "name": "Yoga", "type": "interests", "justification": "Core audience"},
  {"id": "bogus", "name": "frequent TRAVELERS", "type": "behavior", "justification": "Retreats"},
  {"id": "x-1", "name": "Meditation", "type": "Interest", "justification": "Adjacent"}
]}
```"#;

    #[test]
    fn test_validate_requires_description() {
        let err = RecommendationRequest::default().validate().unwrap_err();
        assert_eq!(err.to_string(), MISSING_DESCRIPTION);

        let blank = RecommendationRequest {
            user_input: Some("   ".to_string()),
            business_type: Some("".to_string()),
            ..Default::default()
        };
        assert!(matches!(blank.validate(), Err(RecommendationError::Invalid(_))));
    }

    #[test]
    fn test_validate_questionnaire() {
        let req = RecommendationRequest {
            business_type: Some("Yoga studio".to_string()),
            product_service: Some("Drop-in classes".to_string()),
            target_age: Some("25-40".to_string()),
            budget: Some("medium".to_string()),
            goal: Some("Lead generation".to_string()),
            ..Default::default()
        };
        let brief = req.validate().unwrap();
        assert!(brief.description.contains("Yoga studio"));
        assert!(brief.description.contains("Drop-in classes"));
        assert_eq!(brief.budget, Some(BudgetRange::From500To2000));
        assert_eq!(brief.goal, Some(CampaignGoal::Leads));
        assert_eq!(brief.budget_range.as_deref(), Some("$500 - $2,000/month"));
        assert_eq!(brief.campaign_goal.as_deref(), Some("leads"));
    }

    #[test]
    fn test_validate_rejects_unknown_enums() {
        let req = RecommendationRequest { budget: Some("infinite".to_string()), ..request("bakery") };
        let err = req.validate().unwrap_err().to_string();
        assert!(err.contains("Invalid budget 'infinite'"));
        assert!(err.contains("under_500"));

        let req = RecommendationRequest { goal: Some("fame".to_string()), ..request("bakery") };
        assert!(req.validate().unwrap_err().to_string().contains("Invalid goal"));
    }

    #[test]
    fn test_prompt_contains_catalogue() {
        let categories = store().list().unwrap();
        let index = CategoryIndex::new(&categories);
        let brief = request("Yoga studio in Austin").validate().unwrap();
        let prompt = build_prompt(&brief, &index);
        assert!(prompt.contains("Yoga studio in Austin"));
        assert!(prompt.contains("- interests-yoga | Yoga | interests | Interests > Fitness and wellness > Yoga"));
        assert!(!prompt.contains("- interests | Interests"));
    }

    #[test]
    fn test_large_catalogue_keeps_every_type() {
        let mut categories = vec![
            TargetingCategory::new("interests", "Interests", None, 1, "Unknown", CategoryType::Interests),
            TargetingCategory::new("behaviors", "Behaviors", None, 1, "Unknown", CategoryType::Behaviors),
            TargetingCategory::new("demographics", "Demographics", None, 1, "Unknown", CategoryType::Demographics),
        ];
        for i in 0..MAX_CATALOGUE_ENTRIES + 100 {
            categories.push(TargetingCategory::new(
                format!("interests-topic-{}", i),
                format!("Topic {}", i),
                Some("interests"),
                2,
                "Unknown",
                CategoryType::Interests,
            ));
        }
        categories.push(TargetingCategory::new("behaviors-travel", "Travel", Some("behaviors"), 2, "Unknown", CategoryType::Behaviors));
        categories.push(TargetingCategory::new("demographics-parents", "Parents", Some("demographics"), 2, "Unknown", CategoryType::Demographics));

        let index = CategoryIndex::new(&categories);
        let lines = catalogue(&index);
        assert_eq!(lines.lines().count(), MAX_CATALOGUE_ENTRIES);
        assert!(lines.contains("- behaviors-travel | Travel | behaviors"));
        assert!(lines.contains("- demographics-parents | Parents | demographics"));
        assert!(lines.starts_with("- interests-topic-0 |"));
    }

    #[test]
    fn test_small_catalogue_is_complete() {
        let categories = store().list().unwrap();
        let index = CategoryIndex::new(&categories);
        assert_eq!(catalogue(&index).lines().count(), 3);
    }

    #[test]
    fn test_parse_recommendations_shapes() {
        let bare = json!([{"id": "a", "name": "A", "type": "interests", "justification": "j"}]);
        assert_eq!(parse_recommendations(bare).unwrap().len(), 1);

        let nameless = json!({"recommendations": [{"justification": "no id or name"}]});
        assert!(matches!(parse_recommendations(nameless), Err(AiError::Malformed(_))));

        assert!(parse_recommendations(json!("text")).is_err());
    }

    #[test]
    fn test_enrich_by_id_then_name() {
        let categories = store().list().unwrap();
        let index = CategoryIndex::new(&categories);
        let parsed = parse_recommendations(ai_client::parse_json_response(REPLY).unwrap()).unwrap();
        let recs = enrich(parsed, &index);

        assert_eq!(recs[0].breadcrumbs.as_ref().unwrap(), &vec!["Interests", "Fitness and wellness", "Yoga"]);
        assert_eq!(recs[0].estimated_reach.as_deref(), Some("312,000,000"));

        assert_eq!(recs[1].id, "behaviors-travelers");
        assert_eq!(recs[1].name, "Frequent travelers");
        assert_eq!(recs[1].category_type, "behaviors");

        assert_eq!(recs[2].id, "x-1");
        assert_eq!(recs[2].category_type, "interests");
        assert!(recs[2].breadcrumbs.is_none());
    }

    #[tokio::test]
    async fn test_generate_saves_history() {
        let store = store();
        let llm = MockLlm::replying(REPLY);
        let record = generate(&request("Yoga retreats"), &store, &store, &llm).await.unwrap();

        assert_eq!(llm.call_count(), 1);
        assert!(llm.last_prompt().contains("Yoga retreats"));
        assert_eq!(record.recommendations.len(), 3);
        assert!(chrono::DateTime::parse_from_rfc3339(&record.created_at).is_ok());

        let history = store.list_recommendations(None).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, record.id);
    }

    #[tokio::test]
    async fn test_invalid_request_never_calls_llm() {
        let store = store();
        let llm = MockLlm::replying(REPLY);
        let result = generate(&RecommendationRequest::default(), &store, &store, &llm).await;
        assert!(matches!(result, Err(RecommendationError::Invalid(_))));
        assert_eq!(llm.call_count(), 0);
        assert!(store.list_recommendations(None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_llm_failure_is_generation_error() {
        let store = store();
        let result = generate(&request("bakery"), &store, &store, &MockLlm::failing()).await;
        assert!(matches!(result, Err(RecommendationError::Generation(_))));

        let result = generate(&request("bakery"), &store, &store, &MockLlm::replying("sorry, no")).await;
        assert!(matches!(result, Err(RecommendationError::Generation(AiError::Malformed(_)))));
        assert!(store.list_recommendations(None).unwrap().is_empty());
    }
}
