//! Meta Marketing API client
//!
//! Reach estimates and live targeting/location search over the Graph API.
//! When credentials are missing or the API fails, the search paths fall back
//! to the local category store and a bundled country list.

use crate::db::{CategoryStore, StoreError, TargetingCategory};
use crate::estimates;
use crate::hierarchy::CategoryIndex;
use crate::targeting::TargetingSpec;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::RwLock;
use std::time::Duration;
use thiserror::Error;

const GRAPH_BASE_URL: &str = "https://graph.facebook.com";
const SEARCH_LIMIT: usize = 25;

#[derive(Debug, Error)]
pub enum MetaError {
    #[error("Meta API credentials not configured")]
    NotConfigured,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Meta API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Unexpected Meta API response: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetaCredentials {
    pub access_token: String,
    pub ad_account_id: String,
}

impl MetaCredentials {
    pub fn is_complete(&self) -> bool {
        !self.access_token.trim().is_empty() && !self.ad_account_id.trim().is_empty()
    }

    /// Graph API account node, `act_` prefixed
    pub fn account_node(&self) -> String {
        let id = self.ad_account_id.trim();
        if id.starts_with("act_") {
            id.to_string()
        } else {
            format!("act_{}", id)
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReachEstimate {
    pub users_lower: u64,
    pub users_upper: u64,
    /// Human readable range, e.g. "1.2M - 1.6M"
    pub formatted: String,
    pub estimate_ready: bool,
}

/// A targeting entity as returned by search, live or local
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TargetingOption {
    pub id: String,
    pub name: String,
    /// Meta's type key (`interests`, `behaviors`, `life_events`, ...)
    #[serde(rename = "type")]
    pub meta_type: String,
    pub path: Vec<String>,
    pub audience_size: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocationOption {
    pub key: String,
    pub name: String,
    #[serde(rename = "type")]
    pub location_type: String,
    pub country_code: String,
    pub country_name: String,
}

/// Reach and search capability
#[async_trait]
pub trait ReachProvider: Send + Sync {
    fn is_configured(&self) -> bool;

    fn configure(&self, credentials: MetaCredentials);

    async fn estimate_reach(&self, spec: &TargetingSpec) -> Result<ReachEstimate, MetaError>;

    async fn search_targeting(&self, query: &str) -> Result<Vec<TargetingOption>, MetaError>;

    async fn search_locations(&self, query: &str) -> Result<Vec<LocationOption>, MetaError>;
}

pub struct MetaApiClient {
    credentials: RwLock<Option<MetaCredentials>>,
    base_url: String,
    http: reqwest::Client,
}

impl MetaApiClient {
    pub fn new(credentials: Option<MetaCredentials>, api_version: &str, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            credentials: RwLock::new(credentials.filter(MetaCredentials::is_complete)),
            base_url: format!("{}/{}", GRAPH_BASE_URL, api_version.trim_matches('/')),
            http,
        }
    }

    fn credentials(&self) -> Result<MetaCredentials, MetaError> {
        self.credentials
            .read()
            .ok()
            .and_then(|c| c.clone())
            .ok_or(MetaError::NotConfigured)
    }

    async fn get(&self, path: &str, params: &[(&str, String)]) -> Result<Value, MetaError> {
        let credentials = self.credentials()?;
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .query(params)
            .query(&[("access_token", credentials.access_token.as_str())])
            .send()
            .await?;

        let status = response.status();
        let body: Value = response.json().await?;
        if !status.is_success() {
            return Err(MetaError::Api {
                status: status.as_u16(),
                message: graph_error_message(&body),
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl ReachProvider for MetaApiClient {
    fn is_configured(&self) -> bool {
        self.credentials.read().map(|c| c.is_some()).unwrap_or(false)
    }

    fn configure(&self, credentials: MetaCredentials) {
        if let Ok(mut guard) = self.credentials.write() {
            log::info!("[Meta] Credentials configured for {}", credentials.account_node());
            *guard = Some(credentials).filter(MetaCredentials::is_complete);
        }
    }

    async fn estimate_reach(&self, spec: &TargetingSpec) -> Result<ReachEstimate, MetaError> {
        let account = self.credentials()?.account_node();
        let targeting = serde_json::to_string(spec).map_err(|e| MetaError::Malformed(e.to_string()))?;
        log::info!("[Meta] Reach estimate for {} flexible_spec groups", spec.flexible_spec.len());

        let body = self
            .get(
                &format!("{}/delivery_estimate", account),
                &[
                    ("optimization_goal", "REACH".to_string()),
                    ("targeting_spec", targeting),
                ],
            )
            .await?;
        parse_delivery_estimate(&body)
    }

    async fn search_targeting(&self, query: &str) -> Result<Vec<TargetingOption>, MetaError> {
        let account = self.credentials()?.account_node();
        let body = self
            .get(
                &format!("{}/targetingsearch", account),
                &[("q", query.to_string()), ("limit", SEARCH_LIMIT.to_string())],
            )
            .await?;
        parse_targeting_search(&body)
    }

    async fn search_locations(&self, query: &str) -> Result<Vec<LocationOption>, MetaError> {
        let body = self
            .get(
                "search",
                &[
                    ("type", "adgeolocation".to_string()),
                    ("q", query.to_string()),
                    ("location_types", r#"["country","region","city"]"#.to_string()),
                    ("limit", SEARCH_LIMIT.to_string()),
                ],
            )
            .await?;
        parse_location_search(&body)
    }
}

fn graph_error_message(body: &Value) -> String {
    body.get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}

fn data_array(body: &Value) -> Result<&Vec<Value>, MetaError> {
    body.get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| MetaError::Malformed("missing data array".to_string()))
}

fn as_u64(value: Option<&Value>) -> Option<u64> {
    value.and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
}

fn parse_delivery_estimate(body: &Value) -> Result<ReachEstimate, MetaError> {
    let first = data_array(body)?
        .first()
        .ok_or_else(|| MetaError::Malformed("empty delivery estimate".to_string()))?;

    let lower = as_u64(first.get("estimate_mau_lower_bound")).unwrap_or(0);
    let upper = as_u64(first.get("estimate_mau_upper_bound")).unwrap_or(lower);
    Ok(ReachEstimate {
        users_lower: lower,
        users_upper: upper,
        formatted: estimates::format_range(lower, upper),
        estimate_ready: first.get("estimate_ready").and_then(Value::as_bool).unwrap_or(true),
    })
}

fn parse_targeting_search(body: &Value) -> Result<Vec<TargetingOption>, MetaError> {
    Ok(data_array(body)?
        .iter()
        .filter_map(|entry| {
            let id = entry.get("id").and_then(Value::as_str)?;
            let name = entry.get("name").and_then(Value::as_str)?;
            let path = entry
                .get("path")
                .and_then(Value::as_array)
                .map(|p| p.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default();
            let lower = as_u64(entry.get("audience_size_lower_bound"));
            let upper = as_u64(entry.get("audience_size_upper_bound"));
            Some(TargetingOption {
                id: id.to_string(),
                name: name.to_string(),
                meta_type: entry
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("interests")
                    .to_string(),
                path,
                audience_size: match (lower, upper) {
                    (Some(lower), Some(upper)) => estimates::format_range(lower, upper),
                    _ => crate::db::UNKNOWN_SIZE.to_string(),
                },
            })
        })
        .collect())
}

fn parse_location_search(body: &Value) -> Result<Vec<LocationOption>, MetaError> {
    let text = |entry: &Value, key: &str| {
        entry.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
    };
    Ok(data_array(body)?
        .iter()
        .filter(|entry| entry.get("key").is_some())
        .map(|entry| LocationOption {
            key: entry
                .get("key")
                .map(|k| k.as_str().map(str::to_string).unwrap_or_else(|| k.to_string()))
                .unwrap_or_default(),
            name: text(entry, "name"),
            location_type: text(entry, "type"),
            country_code: text(entry, "country_code"),
            country_name: text(entry, "country_name"),
        })
        .collect())
}

// --- Local fallbacks ---

/// Countries offered when live location search is unavailable
pub const LOCAL_COUNTRIES: &[(&str, &str)] = &[
    ("AR", "Argentina"),
    ("AU", "Australia"),
    ("AT", "Austria"),
    ("BE", "Belgium"),
    ("BR", "Brazil"),
    ("CA", "Canada"),
    ("CL", "Chile"),
    ("CO", "Colombia"),
    ("DK", "Denmark"),
    ("EG", "Egypt"),
    ("FI", "Finland"),
    ("FR", "France"),
    ("DE", "Germany"),
    ("IN", "India"),
    ("ID", "Indonesia"),
    ("IE", "Ireland"),
    ("IL", "Israel"),
    ("IT", "Italy"),
    ("JP", "Japan"),
    ("KE", "Kenya"),
    ("MY", "Malaysia"),
    ("MX", "Mexico"),
    ("NL", "Netherlands"),
    ("NZ", "New Zealand"),
    ("NG", "Nigeria"),
    ("NO", "Norway"),
    ("PH", "Philippines"),
    ("PL", "Poland"),
    ("PT", "Portugal"),
    ("SA", "Saudi Arabia"),
    ("SG", "Singapore"),
    ("ZA", "South Africa"),
    ("KR", "South Korea"),
    ("ES", "Spain"),
    ("SE", "Sweden"),
    ("CH", "Switzerland"),
    ("TH", "Thailand"),
    ("TR", "Turkey"),
    ("AE", "United Arab Emirates"),
    ("GB", "United Kingdom"),
    ("US", "United States"),
    ("VN", "Vietnam"),
];

/// ISO code for a country name from the local list
pub fn country_code(name: &str) -> Option<&'static str> {
    let name = name.trim();
    match name.to_lowercase().as_str() {
        "usa" | "united states of america" | "america" => return Some("US"),
        "uk" | "great britain" | "england" => return Some("GB"),
        _ => {}
    }
    LOCAL_COUNTRIES
        .iter()
        .find(|(_, country)| country.eq_ignore_ascii_case(name))
        .map(|(code, _)| *code)
}

pub fn local_locations(query: &str) -> Vec<LocationOption> {
    let needle = query.trim().to_lowercase();
    LOCAL_COUNTRIES
        .iter()
        .filter(|(code, name)| {
            needle.is_empty() || name.to_lowercase().contains(&needle) || code.eq_ignore_ascii_case(&needle)
        })
        .map(|(code, name)| LocationOption {
            key: code.to_string(),
            name: name.to_string(),
            location_type: "country".to_string(),
            country_code: code.to_string(),
            country_name: name.to_string(),
        })
        .collect()
}

/// Store search shaped like live results, path from breadcrumbs
pub fn local_targeting(store: &dyn CategoryStore, query: &str) -> Result<Vec<TargetingOption>, StoreError> {
    let all = store.list()?;
    let index = CategoryIndex::new(&all);
    Ok(store
        .search(query)?
        .into_iter()
        .take(SEARCH_LIMIT)
        .map(|c: TargetingCategory| TargetingOption {
            path: index.breadcrumbs(&c.id),
            meta_type: crate::targeting::spec_key(c.category_type).to_string(),
            audience_size: c.size,
            id: c.id,
            name: c.name,
        })
        .collect())
}

/// Where search results came from
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    Meta,
    Local,
    LocalFallback,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult<T> {
    pub source: ResultSource,
    pub results: Vec<T>,
}

/// Live targeting search, degrading to the local store
pub async fn search_targeting_with_fallback(
    provider: &dyn ReachProvider,
    store: &dyn CategoryStore,
    query: &str,
) -> Result<SearchResult<TargetingOption>, StoreError> {
    if !provider.is_configured() {
        return Ok(SearchResult { source: ResultSource::Local, results: local_targeting(store, query)? });
    }
    match provider.search_targeting(query).await {
        Ok(results) => Ok(SearchResult { source: ResultSource::Meta, results }),
        Err(e) => {
            log::warn!("[Meta] Targeting search failed, using local store: {}", e);
            Ok(SearchResult {
                source: ResultSource::LocalFallback,
                results: local_targeting(store, query)?,
            })
        }
    }
}

/// Live location search, degrading to the bundled country list
pub async fn search_locations_with_fallback(
    provider: &dyn ReachProvider,
    query: &str,
) -> SearchResult<LocationOption> {
    if !provider.is_configured() {
        return SearchResult { source: ResultSource::Local, results: local_locations(query) };
    }
    match provider.search_locations(query).await {
        Ok(results) => SearchResult { source: ResultSource::Meta, results },
        Err(e) => {
            log::warn!("[Meta] Location search failed, using country list: {}", e);
            SearchResult { source: ResultSource::LocalFallback, results: local_locations(query) }
        }
    }
}
