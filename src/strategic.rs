//! Strategic dialogue: discovery questions, a guided conversation and a final
//! targeting strategy. Every step is one LLM call; this module only shapes the
//! prompts and resolves whatever category names come back against the store.

use crate::ai_client::{parse_json_response, AiError, LlmClient};
use crate::db::{CategoryStore, Recommendation};
use crate::hierarchy::CategoryIndex;
use crate::recommendations::{self, RecommendationError, MISSING_DESCRIPTION};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Conversation turns kept in the prompt
const MAX_HISTORY_TURNS: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryQuestion {
    pub id: String,
    pub question: String,
    #[serde(default)]
    pub purpose: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryRequest {
    #[serde(alias = "businessDescription", alias = "userInput")]
    pub business_profile: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default, alias = "businessContext")]
    pub business_profile: Option<Value>,
}

/// A category name the model mentioned, with its store match if any
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedCategory {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breadcrumbs: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationReply {
    pub reply: String,
    pub suggested_categories: Vec<SuggestedCategory>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyRequest {
    pub business_profile: Option<Value>,
    #[serde(default)]
    pub answers: Vec<Answer>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub name: String,
    pub category_ids: Vec<String>,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Strategy {
    pub summary: String,
    pub segments: Vec<Segment>,
    pub recommendations: Vec<Recommendation>,
}

/// Render a profile given as free text or as an object of answers.
/// Returns `None` when nothing non-blank is in it.
pub fn describe_profile(profile: Option<&Value>) -> Option<String> {
    let text = match profile? {
        Value::String(s) => s.trim().to_string(),
        Value::Object(map) => map
            .iter()
            .filter_map(|(key, value)| {
                let value = match value {
                    Value::String(s) => s.trim().to_string(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                (!value.is_empty()).then(|| format!("{}: {}", key, value))
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    };
    (!text.is_empty()).then_some(text)
}

fn require_profile(profile: Option<&Value>) -> Result<String, RecommendationError> {
    describe_profile(profile).ok_or_else(|| RecommendationError::Invalid(MISSING_DESCRIPTION.to_string()))
}

fn string_field(value: &Value, key: &str) -> String {
    value.get(key).and_then(Value::as_str).unwrap_or_default().trim().to_string()
}

pub async fn discovery_questions(
    request: &DiscoveryRequest,
    llm: &dyn LlmClient,
) -> Result<Vec<DiscoveryQuestion>, RecommendationError> {
    let profile = require_profile(request.business_profile.as_ref())?;

    let prompt = format!(
        r#"You are helping a small business plan a Meta Ads campaign.

Business:
{profile}

Ask 4 to 6 short discovery questions that would most improve audience targeting (customers, buying triggers, location, price point, competitors). Explain the purpose of each.

Respond with JSON only:
{{"questions": [{{"id": "q1", "question": "...", "purpose": "..."}}]}}"#
    );

    let value = parse_json_response(&llm.generate(&prompt, None).await?)?;
    let items = value
        .get("questions")
        .and_then(Value::as_array)
        .or_else(|| value.as_array())
        .ok_or_else(|| AiError::Malformed("missing questions array".to_string()))?;

    let questions: Vec<DiscoveryQuestion> = items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| {
            let question = match item {
                Value::String(s) => s.trim().to_string(),
                other => string_field(other, "question"),
            };
            if question.is_empty() {
                return None;
            }
            let id = Some(string_field(item, "id"))
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| format!("q{}", i + 1));
            Some(DiscoveryQuestion { id, question, purpose: string_field(item, "purpose") })
        })
        .collect();

    if questions.is_empty() {
        return Err(AiError::Malformed("no questions".to_string()).into());
    }
    Ok(questions)
}

/// Match suggested names against the store
pub fn resolve_suggestions(names: &[String], index: &CategoryIndex<'_>) -> Vec<SuggestedCategory> {
    names
        .iter()
        .map(|name| name.trim())
        .filter(|name| !name.is_empty())
        .map(|name| match index.find_by_name(name) {
            Some(category) => SuggestedCategory {
                name: category.name.clone(),
                id: Some(category.id.clone()),
                breadcrumbs: Some(index.breadcrumbs(&category.id)),
            },
            None => SuggestedCategory { name: name.to_string(), id: None, breadcrumbs: None },
        })
        .collect()
}

pub async fn conversation(
    request: &ConversationRequest,
    store: &dyn CategoryStore,
    llm: &dyn LlmClient,
) -> Result<ConversationReply, RecommendationError> {
    let has_user_turn = request
        .messages
        .iter()
        .any(|m| m.role.eq_ignore_ascii_case("user") && !m.content.trim().is_empty());
    if !has_user_turn {
        return Err(RecommendationError::Invalid("Please provide a message".to_string()));
    }

    let skip = request.messages.len().saturating_sub(MAX_HISTORY_TURNS);
    let transcript = request.messages[skip..]
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content.trim()))
        .collect::<Vec<_>>()
        .join("\n");
    let profile = describe_profile(request.business_profile.as_ref())
        .unwrap_or_else(|| "(not provided)".to_string());

    let prompt = format!(
        r#"You are a Meta Ads targeting strategist in a conversation with a business owner.

Business:
{profile}

Conversation so far:
{transcript}

Reply to the last message in a few sentences. If specific Meta targeting categories fit, name them.

Respond with JSON only:
{{"reply": "...", "suggestedCategories": ["category name", "..."]}}"#
    );

    let value = parse_json_response(&llm.generate(&prompt, None).await?)?;
    let reply = string_field(&value, "reply");
    if reply.is_empty() {
        return Err(AiError::Malformed("missing reply".to_string()).into());
    }
    let names: Vec<String> = value
        .get("suggestedCategories")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();

    let categories = store.list()?;
    let index = CategoryIndex::new(&categories);
    Ok(ConversationReply { reply, suggested_categories: resolve_suggestions(&names, &index) })
}

pub async fn generate_targeting(
    request: &StrategyRequest,
    store: &dyn CategoryStore,
    llm: &dyn LlmClient,
) -> Result<Strategy, RecommendationError> {
    let profile = require_profile(request.business_profile.as_ref())?;

    let categories = store.list()?;
    let index = CategoryIndex::new(&categories);

    let answers = request
        .answers
        .iter()
        .filter(|a| !a.answer.trim().is_empty())
        .map(|a| format!("Q: {}\nA: {}", a.question.trim(), a.answer.trim()))
        .collect::<Vec<_>>()
        .join("\n\n");

    let prompt = format!(
        r#"You are a Meta Ads targeting strategist.

Business:
{profile}

Discovery answers:
{answers}

Design a targeting strategy. Group categories from the catalogue into 2 to 4 audience segments; categories inside a segment are alternatives, segments narrow each other. Use exact ids from the catalogue.

Catalogue (id | name | type | path):
{catalogue}

Respond with JSON only:
{{"summary": "...", "segments": [{{"name": "...", "categoryIds": ["..."], "rationale": "..."}}], "recommendations": [{{"id": "...", "name": "...", "type": "...", "justification": "..."}}]}}"#,
        answers = if answers.is_empty() { "(none)".to_string() } else { answers },
        catalogue = recommendations::catalogue(&index),
    );

    let mut value = parse_json_response(&llm.generate(&prompt, None).await?)?;

    let summary = string_field(&value, "summary");
    let segments: Vec<Segment> = value
        .get("segments")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|s| parse_segment(s, &index)).collect())
        .unwrap_or_default();

    let recommendations = match value.get_mut("recommendations").map(Value::take) {
        Some(recs @ Value::Array(_)) if recs.as_array().is_some_and(|a| !a.is_empty()) => {
            recommendations::enrich(recommendations::parse_recommendations(recs)?, &index)
        }
        _ => Vec::new(),
    };

    if summary.is_empty() && recommendations.is_empty() {
        return Err(AiError::Malformed("empty strategy".to_string()).into());
    }
    log::info!(
        "[AI] Strategy with {} segments, {} recommendations",
        segments.len(),
        recommendations.len()
    );
    Ok(Strategy { summary, segments, recommendations })
}

/// Keep only ids the store knows; names the model used instead of ids are
/// resolved once.
fn parse_segment(value: &Value, index: &CategoryIndex<'_>) -> Option<Segment> {
    let name = string_field(value, "name");
    let mut category_ids = Vec::new();
    for raw in value.get("categoryIds").and_then(Value::as_array)?.iter().filter_map(Value::as_str) {
        let resolved = index.get(raw).or_else(|| index.find_by_name(raw));
        if let Some(category) = resolved {
            if !category_ids.contains(&category.id) {
                category_ids.push(category.id.clone());
            }
        }
    }
    if name.is_empty() && category_ids.is_empty() {
        return None;
    }
    Some(Segment { name, category_ids, rationale: string_field(value, "rationale") })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai_client::tests::MockLlm;
    use crate::db::{CategoryType, MemoryStore, TargetingCategory};
    use serde_json::json;

    fn store() -> MemoryStore {
        MemoryStore::with_categories(&[
            TargetingCategory::new("interests", "Interests", None, 1, "Unknown", CategoryType::Interests),
            TargetingCategory::new("interests-yoga", "Yoga", Some("interests"), 2, "312,000,000", CategoryType::Interests),
            TargetingCategory::new("interests-coffee", "Coffee", Some("interests"), 2, "Unknown", CategoryType::Interests),
        ])
    }

    #[test]
    fn test_describe_profile() {
        assert_eq!(describe_profile(Some(&json!("  Bakery "))).as_deref(), Some("Bakery"));
        let profile = json!({"businessType": "Cafe", "location": "", "employees": 4});
        assert_eq!(describe_profile(Some(&profile)).as_deref(), Some("businessType: Cafe\nemployees: 4"));
        assert_eq!(describe_profile(Some(&json!({"businessType": " "}))), None);
        assert_eq!(describe_profile(None), None);
    }

    #[tokio::test]
    async fn test_discovery_questions() {
        let llm = MockLlm::replying(r#"{"questions": [
            {"id": "q1", "question": "Who buys most?", "purpose": "Core buyer"},
            {"question": "Where are they?"},
            "Any seasonality?",
            {"purpose": "dropped"}
        ]}"#);
        let request = DiscoveryRequest { business_profile: Some(json!("Coffee roaster")) };
        let questions = discovery_questions(&request, &llm).await.unwrap();

        assert_eq!(questions.len(), 3);
        assert_eq!(questions[1].id, "q2");
        assert_eq!(questions[2].question, "Any seasonality?");
        assert!(llm.last_prompt().contains("Coffee roaster"));
    }

    #[tokio::test]
    async fn test_discovery_requires_profile() {
        let llm = MockLlm::replying("{}");
        let request = DiscoveryRequest { business_profile: None };
        let err = discovery_questions(&request, &llm).await.unwrap_err();
        assert_eq!(err.to_string(), MISSING_DESCRIPTION);
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_conversation_resolves_suggestions() {
        let llm = MockLlm::replying(r#"{"reply": "Try yoga fans.", "suggestedCategories": ["yoga", "Pilates"]}"#);
        let request = ConversationRequest {
            messages: vec![ChatMessage { role: "user".to_string(), content: "Who should I target?".to_string() }],
            business_profile: Some(json!({"businessType": "Studio"})),
        };
        let reply = conversation(&request, &store(), &llm).await.unwrap();

        assert_eq!(reply.reply, "Try yoga fans.");
        assert_eq!(reply.suggested_categories[0].id.as_deref(), Some("interests-yoga"));
        assert_eq!(reply.suggested_categories[0].name, "Yoga");
        assert_eq!(reply.suggested_categories[1].id, None);
    }

    #[tokio::test]
    async fn test_conversation_requires_user_message() {
        let llm = MockLlm::replying("{}");
        let request = ConversationRequest {
            messages: vec![ChatMessage { role: "assistant".to_string(), content: "Hi".to_string() }],
            business_profile: None,
        };
        assert!(matches!(
            conversation(&request, &store(), &llm).await,
            Err(RecommendationError::Invalid(_))
        ));
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_generate_targeting() {
        let llm = MockLlm::replying(r#"{
            "summary": "Reach wellness-minded coffee drinkers",
            "segments": [
                {"name": "Wellness", "categoryIds": ["interests-yoga", "Yoga", "ghost"], "rationale": "Core"},
                {"name": "Coffee", "categoryIds": ["Coffee"], "rationale": "Product fit"}
            ],
            "recommendations": [{"id": "interests-coffee", "name": "Coffee", "type": "interests", "justification": "Buyers"}]
        }"#);
        let request = StrategyRequest {
            business_profile: Some(json!("Organic cafe")),
            answers: vec![Answer { question: "Who buys?".to_string(), answer: "Commuters".to_string() }],
        };
        let strategy = generate_targeting(&request, &store(), &llm).await.unwrap();

        assert_eq!(strategy.segments[0].category_ids, vec!["interests-yoga"]);
        assert_eq!(strategy.segments[1].category_ids, vec!["interests-coffee"]);
        assert_eq!(strategy.recommendations[0].breadcrumbs.as_ref().unwrap(), &vec!["Interests", "Coffee"]);
        assert!(llm.last_prompt().contains("A: Commuters"));
        assert!(llm.last_prompt().contains("- interests-yoga | Yoga"));
    }

    #[tokio::test]
    async fn test_generate_targeting_llm_failure() {
        let request = StrategyRequest { business_profile: Some(json!("Cafe")), answers: vec![] };
        let result = generate_targeting(&request, &store(), &MockLlm::failing()).await;
        assert!(matches!(result, Err(RecommendationError::Generation(_))));
    }
}
