//! Gemini API client for recommendation and strategy text
//!
//! The LLM is treated as an opaque JSON generator: callers build a prompt,
//! optionally pass a response schema, and parse what comes back. Nothing here
//! reasons about targeting.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("GEMINI_API_KEY not set")]
    NotConfigured,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Empty response from model")]
    EmptyResponse,

    #[error("Malformed model output: {0}")]
    Malformed(String),
}

/// Text generation capability
#[async_trait]
pub trait LlmClient: Send + Sync {
    fn is_available(&self) -> bool;

    /// Generate a response for `prompt`. With a schema the provider is asked
    /// for JSON conforming to it.
    async fn generate(&self, prompt: &str, schema: Option<&Value>) -> Result<String, AiError>;
}

/// Gemini generateContent request format
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<Value>,
}

/// Gemini generateContent response format
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiClient {
    api_key: Option<String>,
    model: String,
    base_url: String,
    http: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: Option<String>, model: &str, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_key: api_key.filter(|k| !k.is_empty()),
            model: model.to_string(),
            base_url: GEMINI_BASE_URL.to_string(),
            http,
        }
    }

    /// Point at a different endpoint (proxies, local fakes)
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate(&self, prompt: &str, schema: Option<&Value>) -> Result<String, AiError> {
        let api_key = self.api_key.as_deref().ok_or(AiError::NotConfigured)?;

        let request = GeminiRequest {
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts: vec![GeminiPart { text: Some(prompt.to_string()) }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.4,
                max_output_tokens: 4096,
                response_mime_type: schema.map(|_| "application/json".to_string()),
                response_schema: schema.cloned(),
            },
        };

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let response = self
            .http
            .post(&url)
            .query(&[("key", api_key)])
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Api { status, body });
        }

        let api_response: GeminiResponse = response.json().await?;

        if let Some(usage) = &api_response.usage_metadata {
            log::debug!(
                "[AI] {} tokens in, {} tokens out",
                usage.prompt_token_count,
                usage.candidates_token_count
            );
        }

        let text: String = api_response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(AiError::EmptyResponse);
        }
        Ok(text)
    }
}

/// Strip markdown fences and surrounding prose, then parse JSON
pub fn parse_json_response(text: &str) -> Result<Value, AiError> {
    let trimmed = text.trim();

    let json_text = if trimmed.starts_with("```") {
        trimmed
            .lines()
            .skip(1)
            .take_while(|l| !l.starts_with("```"))
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        trimmed.to_string()
    };

    if let Ok(value) = serde_json::from_str::<Value>(&json_text) {
        return Ok(value);
    }

    // Models sometimes wrap the object in a sentence
    let start = json_text.find(|c| c == '{' || c == '[');
    let end = json_text.rfind(|c| c == '}' || c == ']');
    match (start, end) {
        (Some(start), Some(end)) if end > start => {
            serde_json::from_str(&json_text[start..=end]).map_err(|e| AiError::Malformed(e.to_string()))
        }
        _ => Err(AiError::Malformed("no JSON object in response".to_string())),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Canned LLM: replies with `reply`, or fails when it is `None`.
    /// Records prompts so tests can inspect what was sent.
    pub(crate) struct MockLlm {
        reply: Option<String>,
        pub calls: AtomicUsize,
        pub prompts: Mutex<Vec<String>>,
    }

    impl MockLlm {
        pub(crate) fn replying(reply: &str) -> Self {
            Self { reply: Some(reply.to_string()), calls: AtomicUsize::new(0), prompts: Mutex::new(Vec::new()) }
        }

        pub(crate) fn failing() -> Self {
            Self { reply: None, calls: AtomicUsize::new(0), prompts: Mutex::new(Vec::new()) }
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub(crate) fn last_prompt(&self) -> String {
            self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl LlmClient for MockLlm {
        fn is_available(&self) -> bool {
            true
        }

        async fn generate(&self, prompt: &str, _schema: Option<&Value>) -> Result<String, AiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply
                .clone()
                .ok_or(AiError::Api { status: 503, body: "overloaded".to_string() })
        }
    }

    #[test]
    fn test_parse_json_response() {
        let json = r#"{"recommendations": [{"id": "interests-yoga"}]}"#;
        let value = parse_json_response(json).unwrap();
        assert_eq!(value["recommendations"][0]["id"], "interests-yoga");
    }

    #[test]
    fn test_parse_json_response_with_markdown() {
        let json = "```json\n{\"title\": \"Test\"}\n```";
        let value = parse_json_response(json).unwrap();
        assert_eq!(value["title"], "Test");
    }

    #[test]
    fn test_parse_json_response_with_prose() {
        let text = "Here is your strategy: {\"summary\": \"ok\"} Hope it helps!";
        assert_eq!(parse_json_response(text).unwrap()["summary"], "ok");
    }

    #[test]
    fn test_parse_json_response_garbage() {
        assert!(matches!(parse_json_response("no json here"), Err(AiError::Malformed(_))));
    }

    #[test]
    fn test_request_shape() {
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts: vec![GeminiPart { text: Some("hi".to_string()) }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.4,
                max_output_tokens: 10,
                response_mime_type: None,
                response_schema: None,
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 10);
        assert!(json["generationConfig"].get("responseSchema").is_none());
    }

    #[test]
    fn test_response_text_extraction() {
        let body = r#"{"candidates": [{"content": {"role": "model", "parts": [{"text": "{\"a\":"}, {"text": "1}"}]}}],
                      "usageMetadata": {"promptTokenCount": 5, "candidatesTokenCount": 2}}"#;
        let response: GeminiResponse = serde_json::from_str(body).unwrap();
        let content = response.candidates.into_iter().next().unwrap().content.unwrap();
        let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
        assert_eq!(parse_json_response(&text).unwrap()["a"], 1);
    }

    #[tokio::test]
    async fn test_generate_without_key() {
        let client = GeminiClient::new(None, "gemini-2.0-flash", Duration::from_secs(5));
        assert!(!client.is_available());
        assert!(matches!(client.generate("hi", None).await, Err(AiError::NotConfigured)));
    }
}
