//! REST API for the targeting assistant
//!
//! axum router over injected capabilities: the category store, the
//! recommendation history, the LLM and the Meta reach provider. Every error
//! leaves as `{"success": false, "error": message}`.

use crate::ai_client::LlmClient;
use crate::db::{CategoryStore, RecommendationLog, StoreError, TargetingCategory};
use crate::estimates::{self, CampaignGoal};
use crate::hierarchy::{self, CategoryIndex};
use crate::import::{self, ImportError};
use crate::meta_client::{self, MetaCredentials, ReachProvider};
use crate::recommendations::{self, RecommendationError, RecommendationRequest, GENERATION_FAILED, MISSING_DESCRIPTION};
use crate::settings::{self, SettingsStore};
use crate::strategic::{self, ConversationRequest, DiscoveryRequest, StrategyRequest};
use crate::targeting::{self, TargetingGroup};
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Taxonomy uploads can be large Meta dumps
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

// ============================================================================
// AppState
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CategoryStore>,
    pub history: Arc<dyn RecommendationLog>,
    pub llm: Arc<dyn LlmClient>,
    pub meta: Arc<dyn ReachProvider>,
    pub settings: Arc<SettingsStore>,
    pub start_time: Instant,
}

// ============================================================================
// Error type
// ============================================================================

#[derive(Debug)]
pub struct AppError(pub StatusCode, pub String);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({"success": false, "error": self.1}))).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        log::error!("[Server] Store error: {}", e);
        AppError(StatusCode::INTERNAL_SERVER_ERROR, "Category store unavailable".to_string())
    }
}

impl From<RecommendationError> for AppError {
    fn from(e: RecommendationError) -> Self {
        match e {
            RecommendationError::Invalid(msg) => bad_request(msg),
            RecommendationError::Generation(e) => {
                log::error!("[AI] Generation failed: {}", e);
                AppError(StatusCode::INTERNAL_SERVER_ERROR, GENERATION_FAILED.to_string())
            }
            RecommendationError::Store(e) => e.into(),
        }
    }
}

impl From<ImportError> for AppError {
    fn from(e: ImportError) -> Self {
        bad_request(e.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

fn not_found(msg: impl Into<String>) -> AppError {
    AppError(StatusCode::NOT_FOUND, msg.into())
}

fn bad_request(msg: impl Into<String>) -> AppError {
    AppError(StatusCode::BAD_REQUEST, msg.into())
}

// ============================================================================
// Request / Response types
// ============================================================================

#[derive(Deserialize)]
struct CategoriesQuery {
    search: Option<String>,
    parent: Option<String>,
}

#[derive(Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct SearchQuery {
    q: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    success: bool,
    id: String,
    recommendations: Vec<crate::db::Recommendation>,
    created_at: String,
}

#[derive(Serialize)]
struct UploadResponse {
    success: bool,
    inserted: usize,
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReachRequest {
    #[serde(default)]
    groups: Vec<TargetingGroup>,
    #[serde(default)]
    countries: Vec<String>,
    geographic_focus: Option<String>,
    age_min: Option<u8>,
    age_max: Option<u8>,
    target_age: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigureRequest {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    ad_account_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EstimateRequest {
    #[serde(default)]
    category_ids: Vec<String>,
    campaign_goal: Option<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    categories: usize,
    llm_configured: bool,
    meta_configured: bool,
    uptime_secs: u64,
}

// ============================================================================
// Helpers
// ============================================================================

/// `parent=null`, `parent=root` and an empty value all select roots
fn parent_filter(parent: &str) -> Option<&str> {
    match parent.trim() {
        "" | "null" | "root" => None,
        id => Some(id),
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

// ============================================================================
// Handlers
// ============================================================================

// GET /health
async fn health_handler(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: VERSION.to_string(),
        categories: state.store.count()?,
        llm_configured: state.llm.is_available(),
        meta_configured: state.meta.is_configured(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    }))
}

// GET /api/targeting-categories
async fn list_categories_handler(
    State(state): State<AppState>,
    Query(query): Query<CategoriesQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let categories = match (non_blank(query.search.as_deref()), query.parent.as_deref()) {
        (Some(search), parent) => {
            let found = state.store.search(search)?;
            match parent {
                Some(parent) => {
                    let parent = parent_filter(parent);
                    found.into_iter().filter(|c| c.parent() == parent).collect()
                }
                None => found,
            }
        }
        (None, Some(parent)) => state.store.get_by_parent(parent_filter(parent))?,
        (None, None) => state.store.list()?,
    };

    Ok(Json(json!({
        "success": true,
        "count": categories.len(),
        "categories": categories,
    })))
}

// GET /api/targeting-categories/hierarchical
async fn hierarchical_handler(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let categories = state.store.list()?;
    let tree = hierarchy::build_tree(&categories);
    let count = hierarchy::count_nodes(&tree);
    if count < categories.len() {
        log::debug!("[Server] {} categories left out of the tree", categories.len() - count);
    }

    Ok(Json(json!({
        "success": true,
        "count": count,
        "categories": tree,
    })))
}

// GET /api/targeting-categories/{id}
async fn get_category_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let category = state.store
        .get_by_id(&id)?
        .ok_or_else(|| not_found(format!("Category '{}' not found", id)))?;

    let all = state.store.list()?;
    let breadcrumbs = hierarchy::breadcrumbs(&all, &category.id);

    Ok(Json(json!({
        "success": true,
        "category": category,
        "breadcrumbs": breadcrumbs,
    })))
}

fn insert_categories(state: &AppState, categories: &[TargetingCategory], source: &str) -> Result<Json<UploadResponse>, AppError> {
    let inserted = state.store.bulk_insert(categories)?;
    log::info!("[POST {}] Inserted {} categories", source, inserted);
    Ok(Json(UploadResponse {
        success: true,
        inserted,
        message: format!("Inserted {} categories", inserted),
    }))
}

// POST /api/targeting-categories/upload-meta-data
async fn upload_meta_handler(State(state): State<AppState>, body: String) -> Result<Json<UploadResponse>, AppError> {
    let categories = import::parse_meta_dump(&body)?;
    insert_categories(&state, &categories, "/api/targeting-categories/upload-meta-data")
}

// POST /api/targeting-categories/bulk-upload
async fn bulk_upload_handler(State(state): State<AppState>, body: String) -> Result<Json<UploadResponse>, AppError> {
    let categories = import::parse_records(&body)?;
    insert_categories(&state, &categories, "/api/targeting-categories/bulk-upload")
}

// POST /api/recommendations/generate
async fn generate_recommendations_handler(
    State(state): State<AppState>,
    payload: Result<Json<RecommendationRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>, AppError> {
    // An unreadable body is treated like an empty questionnaire
    let Json(request) = payload.map_err(|rejection| {
        log::debug!("[Server] Rejected generate body: {}", rejection.body_text());
        bad_request(MISSING_DESCRIPTION)
    })?;
    let record = recommendations::generate(
        &request,
        state.store.as_ref(),
        state.history.as_ref(),
        state.llm.as_ref(),
    )
    .await?;

    Ok(Json(GenerateResponse {
        success: true,
        id: record.id,
        recommendations: record.recommendations,
        created_at: record.created_at,
    }))
}

// GET /api/recommendations
async fn list_recommendations_handler(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let records = state.history.list_recommendations(query.limit)?;
    Ok(Json(json!({
        "success": true,
        "count": records.len(),
        "recommendations": records,
    })))
}

// POST /api/strategic/discovery-questions
async fn discovery_questions_handler(
    State(state): State<AppState>,
    payload: Result<Json<DiscoveryRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Json(request) = payload?;
    let questions = strategic::discovery_questions(&request, state.llm.as_ref()).await?;
    Ok(Json(json!({"success": true, "questions": questions})))
}

// POST /api/strategic/conversation
async fn conversation_handler(
    State(state): State<AppState>,
    payload: Result<Json<ConversationRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Json(request) = payload?;
    let reply = strategic::conversation(&request, state.store.as_ref(), state.llm.as_ref()).await?;
    Ok(Json(json!({
        "success": true,
        "reply": reply.reply,
        "suggestedCategories": reply.suggested_categories,
    })))
}

// POST /api/strategic/generate-targeting
async fn generate_targeting_handler(
    State(state): State<AppState>,
    payload: Result<Json<StrategyRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Json(request) = payload?;
    let strategy = strategic::generate_targeting(&request, state.store.as_ref(), state.llm.as_ref()).await?;
    Ok(Json(json!({
        "success": true,
        "summary": strategy.summary,
        "segments": strategy.segments,
        "recommendations": strategy.recommendations,
    })))
}

// POST /api/meta/reach-estimate
async fn reach_estimate_handler(
    State(state): State<AppState>,
    payload: Result<Json<ReachRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    if !state.meta.is_configured() {
        let body = json!({
            "success": false,
            "configured": false,
            "message": "Meta API credentials are not configured. Add an access token and ad account id to get live reach estimates.",
        });
        return Ok((StatusCode::BAD_REQUEST, Json(body)).into_response());
    }

    let Json(request) = payload?;
    if request.groups.iter().all(|g| g.items.is_empty()) {
        return Err(bad_request("Please select at least one targeting category"));
    }

    let countries = if request.countries.is_empty() {
        targeting::parse_countries(request.geographic_focus.as_deref())
    } else {
        request.countries.iter().map(|c| c.trim().to_uppercase()).collect()
    };
    let age_range = match (request.age_min, request.age_max) {
        (Some(min), Some(max)) => Some((min, max)),
        (Some(min), None) => Some((min, targeting::MAX_AGE)),
        (None, Some(max)) => Some((targeting::MIN_AGE, max)),
        (None, None) => request.target_age.as_deref().and_then(targeting::parse_age_range),
    };

    let built = targeting::build_targeting_spec(state.store.as_ref(), &request.groups, countries, age_range)?;
    if built.spec.flexible_spec.is_empty() {
        return Err(bad_request("None of the selected categories can be targeted on Meta"));
    }

    match state.meta.estimate_reach(&built.spec).await {
        Ok(estimate) => Ok(Json(json!({
            "success": true,
            "configured": true,
            "estimate": estimate,
            "targetingSpec": built.spec,
            "skipped": built.skipped,
        }))
        .into_response()),
        Err(e) => {
            log::error!("[Meta] Reach estimate failed: {}", e);
            Err(AppError(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to estimate reach. Please try again.".to_string(),
            ))
        }
    }
}

// GET /api/meta/search-targeting?q=
async fn search_targeting_handler(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let q = non_blank(query.q.as_deref()).ok_or_else(|| bad_request("Query parameter 'q' is required"))?;
    let result = meta_client::search_targeting_with_fallback(state.meta.as_ref(), state.store.as_ref(), q).await?;
    Ok(Json(json!({
        "success": true,
        "source": result.source,
        "count": result.results.len(),
        "results": result.results,
    })))
}

// GET /api/meta/search-locations?q=
async fn search_locations_handler(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let q = non_blank(query.q.as_deref()).ok_or_else(|| bad_request("Query parameter 'q' is required"))?;
    let result = meta_client::search_locations_with_fallback(state.meta.as_ref(), q).await;
    Ok(Json(json!({
        "success": true,
        "source": result.source,
        "count": result.results.len(),
        "results": result.results,
    })))
}

// POST /api/meta/configure
async fn configure_meta_handler(
    State(state): State<AppState>,
    payload: Result<Json<ConfigureRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Json(request) = payload?;
    let credentials = MetaCredentials {
        access_token: request.access_token.trim().to_string(),
        ad_account_id: request.ad_account_id.trim().to_string(),
    };
    if !credentials.is_complete() {
        return Err(bad_request("Both accessToken and adAccountId are required"));
    }

    state.settings
        .set_meta_credentials(credentials.access_token.clone(), credentials.ad_account_id.clone())
        .map_err(|e| AppError(StatusCode::INTERNAL_SERVER_ERROR, e))?;
    let account = credentials.account_node();
    state.meta.configure(credentials);

    Ok(Json(json!({"success": true, "configured": true, "adAccountId": account})))
}

// GET /api/meta/status
async fn meta_status_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let snapshot = state.settings.snapshot();
    Json(json!({
        "success": true,
        "configured": state.meta.is_configured(),
        "adAccountId": snapshot.meta_ad_account_id,
        "accessToken": snapshot.meta_access_token.as_deref().map(settings::mask_secret),
        "apiVersion": snapshot.meta_api_version,
    }))
}

// POST /api/estimates
async fn estimates_handler(
    State(state): State<AppState>,
    payload: Result<Json<EstimateRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Json(request) = payload?;
    let goal = match non_blank(request.campaign_goal.as_deref()) {
        Some(raw) => Some(
            CampaignGoal::from_str(raw).ok_or_else(|| bad_request(format!("Invalid campaign goal '{}'", raw)))?,
        ),
        None => None,
    };

    let all = state.store.list()?;
    let index = CategoryIndex::new(&all);
    let mut selection = Vec::new();
    let mut unknown_ids = Vec::new();
    for id in &request.category_ids {
        match index.get(id) {
            Some(category) => selection.push(category.clone()),
            None => unknown_ids.push(id.clone()),
        }
    }

    Ok(Json(json!({
        "success": true,
        "estimate": estimates::estimate(&selection, goal),
        "unknownIds": unknown_ids,
    })))
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/recommendations/generate", post(generate_recommendations_handler))
        .route("/api/recommendations", get(list_recommendations_handler))
        .route("/api/targeting-categories", get(list_categories_handler))
        .route("/api/targeting-categories/hierarchical", get(hierarchical_handler))
        .route("/api/targeting-categories/upload-meta-data", post(upload_meta_handler))
        .route("/api/targeting-categories/bulk-upload", post(bulk_upload_handler))
        .route("/api/targeting-categories/{id}", get(get_category_handler))
        .route("/api/strategic/discovery-questions", post(discovery_questions_handler))
        .route("/api/strategic/conversation", post(conversation_handler))
        .route("/api/strategic/generate-targeting", post(generate_targeting_handler))
        .route("/api/meta/reach-estimate", post(reach_estimate_handler))
        .route("/api/meta/search-targeting", get(search_targeting_handler))
        .route("/api/meta/search-locations", get(search_locations_handler))
        .route("/api/meta/configure", post(configure_meta_handler))
        .route("/api/meta/status", get(meta_status_handler))
        .route("/api/estimates", post(estimates_handler))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai_client::tests::MockLlm;
    use crate::db::{CategoryType, MemoryStore};
    use crate::meta_client::tests::FakeReach;
    use crate::settings::Settings;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn categories() -> Vec<TargetingCategory> {
        vec![
            TargetingCategory::new("interests", "Interests", None, 1, "Unknown", CategoryType::Interests),
            TargetingCategory::new("interests-fitness", "Fitness and wellness", Some("interests"), 2, "Unknown", CategoryType::Interests),
            TargetingCategory::new("6003306084421", "Yoga", Some("interests-fitness"), 3, "312,000,000", CategoryType::Interests),
            TargetingCategory::new("behaviors", "Behaviors", None, 1, "Unknown", CategoryType::Behaviors),
            TargetingCategory::new("6002714895372", "Frequent travelers", Some("behaviors"), 2, "1.2M - 1.6M", CategoryType::Behaviors),
            TargetingCategory::new("stray", "Stray", Some("missing"), 3, "Unknown", CategoryType::Behaviors),
        ]
    }

    struct Harness {
        store: Arc<MemoryStore>,
        llm: Arc<MockLlm>,
        state: AppState,
    }

    fn harness(llm: MockLlm, meta: FakeReach) -> Harness {
        let store = Arc::new(MemoryStore::with_categories(&categories()));
        let llm = Arc::new(llm);
        let state = AppState {
            store: store.clone(),
            history: store.clone(),
            llm: llm.clone(),
            meta: Arc::new(meta),
            settings: Arc::new(SettingsStore::ephemeral(Settings::default())),
            start_time: Instant::now(),
        };
        Harness { store, llm, state }
    }

    fn default_harness() -> Harness {
        harness(MockLlm::replying("{}"), FakeReach::new(false, false))
    }

    async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn get_json(state: &AppState, uri: &str) -> (StatusCode, Value) {
        send(state, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
    }

    async fn post_json(state: &AppState, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        send(state, request).await
    }

    #[tokio::test]
    async fn test_health() {
        let h = default_harness();
        let (status, body) = get_json(&h.state, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["categories"], 6);
        assert_eq!(body["meta_configured"], false);
    }

    #[tokio::test]
    async fn test_list_search_and_parent_filters() {
        let h = default_harness();

        let (_, body) = get_json(&h.state, "/api/targeting-categories").await;
        assert_eq!(body["count"], 6);

        let (_, body) = get_json(&h.state, "/api/targeting-categories?search=YOGA").await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["categories"][0]["id"], "6003306084421");

        let (_, body) = get_json(&h.state, "/api/targeting-categories?parent=null").await;
        let ids: Vec<_> = body["categories"].as_array().unwrap().iter().map(|c| c["id"].clone()).collect();
        assert_eq!(ids, vec!["interests", "behaviors"]);

        let (_, body) = get_json(&h.state, "/api/targeting-categories?parent=interests").await;
        assert_eq!(body["categories"][0]["id"], "interests-fitness");

        let (_, body) = get_json(&h.state, "/api/targeting-categories?search=nothing-like-this").await;
        assert_eq!(body["success"], true);
        assert_eq!(body["count"], 0);
    }

    #[tokio::test]
    async fn test_hierarchical_drops_orphans() {
        let h = default_harness();
        let (status, body) = get_json(&h.state, "/api/targeting-categories/hierarchical").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 5);
        assert_eq!(body["categories"][0]["name"], "Interests");
        assert_eq!(body["categories"][0]["children"][0]["children"][0]["name"], "Yoga");
        assert_eq!(body["categories"][0]["children"][0]["children"][0]["parentId"], "interests-fitness");
    }

    #[tokio::test]
    async fn test_get_category_with_breadcrumbs() {
        let h = default_harness();
        let (status, body) = get_json(&h.state, "/api/targeting-categories/6003306084421").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["category"]["name"], "Yoga");
        assert_eq!(body["breadcrumbs"], json!(["Interests", "Fitness and wellness", "Yoga"]));

        let (status, body) = get_json(&h.state, "/api/targeting-categories/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Category 'nope' not found");
    }

    #[tokio::test]
    async fn test_bulk_upload_and_meta_upload() {
        let h = default_harness();
        let records = json!([{"id": "interests-pilates", "name": "Pilates", "parentId": "interests-fitness",
                              "level": 3, "size": "45,000,000", "categoryType": "interests"}]);
        let (status, body) = post_json(&h.state, "/api/targeting-categories/bulk-upload", records).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["inserted"], 1);
        assert_eq!(h.store.count().unwrap(), 7);

        let dump = json!({"data": [{"id": "6003", "name": "Espresso", "type": "interests",
                                    "path": ["Food and drink", "Coffee", "Espresso"],
                                    "audience_size_lower_bound": 1000000, "audience_size_upper_bound": 1200000}]});
        let (status, body) = post_json(&h.state, "/api/targeting-categories/upload-meta-data", dump).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["inserted"].as_u64().unwrap() >= 3);
        assert!(h.store.get_by_id("6003").unwrap().is_some());

        let (status, body) = post_json(&h.state, "/api/targeting-categories/bulk-upload", json!("nope")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_generate_recommendations() {
        let reply = r#"{"recommendations": [{"id": "6003306084421", "name": "Yoga", "type": "interests", "justification": "fit"}]}"#;
        let h = harness(MockLlm::replying(reply), FakeReach::new(false, false));

        let (status, body) = post_json(
            &h.state,
            "/api/recommendations/generate",
            json!({"businessType": "Yoga studio", "budget": "low", "goal": "awareness"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["recommendations"][0]["estimatedReach"], "312,000,000");
        assert_eq!(body["recommendations"][0]["breadcrumbs"][1], "Fitness and wellness");
        assert!(body["createdAt"].is_string());

        let (_, history) = get_json(&h.state, "/api/recommendations").await;
        assert_eq!(history["count"], 1);
        assert_eq!(history["recommendations"][0]["id"], body["id"]);
    }

    #[tokio::test]
    async fn test_generate_validation_and_failure() {
        let h = harness(MockLlm::failing(), FakeReach::new(false, false));

        let (status, body) = post_json(&h.state, "/api/recommendations/generate", json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Please provide a description of your business");
        assert_eq!(h.llm.call_count(), 0);

        let (status, body) = post_json(&h.state, "/api/recommendations/generate", json!({"userInput": "Bakery"})).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], GENERATION_FAILED);

        let request = Request::builder()
            .method("POST")
            .uri("/api/recommendations/generate")
            .header("content-type", "application/json")
            .body(Body::from("{ broken"))
            .unwrap();
        let (status, body) = send(&h.state, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], MISSING_DESCRIPTION);

        // wrong field types are a parse failure too
        let (status, body) = post_json(&h.state, "/api/recommendations/generate", json!({"userInput": 42})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], MISSING_DESCRIPTION);
        assert_eq!(h.llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_reach_estimate_not_configured() {
        let h = default_harness();
        let (status, body) = post_json(&h.state, "/api/meta/reach-estimate", json!({"groups": []})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["configured"], false);
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn test_reach_estimate_configured() {
        let h = harness(MockLlm::replying("{}"), FakeReach::new(true, false));
        let request = json!({
            "groups": [{"items": ["6003306084421", "interests"]}, {"items": ["6002714895372"]}],
            "geographicFocus": "Canada",
            "targetAge": "25-34"
        });
        let (status, body) = post_json(&h.state, "/api/meta/reach-estimate", request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["estimate"]["usersLower"], 1_200_000);
        assert_eq!(body["targetingSpec"]["geo_locations"]["countries"], json!(["CA"]));
        assert_eq!(body["targetingSpec"]["age_min"], 25);
        assert_eq!(body["targetingSpec"]["flexible_spec"].as_array().unwrap().len(), 2);
        assert_eq!(body["skipped"][0]["id"], "interests");

        let (status, _) = post_json(&h.state, "/api/meta/reach-estimate", json!({"groups": []})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_reach_estimate_api_failure() {
        let h = harness(MockLlm::replying("{}"), FakeReach::new(true, true));
        let (status, body) = post_json(
            &h.state,
            "/api/meta/reach-estimate",
            json!({"groups": [{"items": ["6003306084421"]}]}),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Failed to estimate reach. Please try again.");
    }

    #[tokio::test]
    async fn test_search_endpoints_fall_back() {
        let h = default_harness();
        let (status, body) = get_json(&h.state, "/api/meta/search-targeting?q=yoga").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["source"], "local");
        assert_eq!(body["results"][0]["path"], json!(["Interests", "Fitness and wellness", "Yoga"]));

        let (_, body) = get_json(&h.state, "/api/meta/search-locations?q=germany").await;
        assert_eq!(body["source"], "local");
        assert_eq!(body["results"][0]["key"], "DE");

        let (status, _) = get_json(&h.state, "/api/meta/search-targeting").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let failing = harness(MockLlm::replying("{}"), FakeReach::new(true, true));
        let (_, body) = get_json(&failing.state, "/api/meta/search-targeting?q=yoga").await;
        assert_eq!(body["source"], "local_fallback");
    }

    #[tokio::test]
    async fn test_configure_and_status() {
        let h = default_harness();
        let (status, _) = post_json(&h.state, "/api/meta/configure", json!({"accessToken": "abc"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = post_json(
            &h.state,
            "/api/meta/configure",
            json!({"accessToken": "EAAB1234567890", "adAccountId": "42"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["adAccountId"], "act_42");

        let (_, body) = get_json(&h.state, "/api/meta/status").await;
        assert_eq!(body["adAccountId"], "42");
        assert_eq!(body["accessToken"], "EAAB...7890");
    }

    #[tokio::test]
    async fn test_estimates_endpoint() {
        let h = default_harness();
        let (status, body) = post_json(
            &h.state,
            "/api/estimates",
            json!({"categoryIds": ["6003306084421", "6002714895372", "ghost"], "campaignGoal": "sales"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["estimate"]["selected"], 2);
        assert_eq!(body["estimate"]["cpm"]["low"], 10.0);
        assert_eq!(body["unknownIds"], json!(["ghost"]));

        let (status, _) = post_json(&h.state, "/api/estimates", json!({"categoryIds": [], "campaignGoal": "fame"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_strategic_endpoints() {
        let llm = MockLlm::replying(r#"{"questions": [{"id": "q1", "question": "Who buys?", "purpose": "p"}],
                                        "reply": "Target yoga fans", "suggestedCategories": ["Yoga"],
                                        "summary": "Plan", "segments": [], "recommendations": []}"#);
        let h = harness(llm, FakeReach::new(false, false));

        let (status, body) = post_json(&h.state, "/api/strategic/discovery-questions", json!({"businessProfile": "Studio"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["questions"][0]["question"], "Who buys?");

        let (_, body) = post_json(
            &h.state,
            "/api/strategic/conversation",
            json!({"messages": [{"role": "user", "content": "ideas?"}]}),
        )
        .await;
        assert_eq!(body["suggestedCategories"][0]["id"], "6003306084421");

        let (_, body) = post_json(&h.state, "/api/strategic/generate-targeting", json!({"businessProfile": "Studio"})).await;
        assert_eq!(body["summary"], "Plan");

        let (status, _) = post_json(&h.state, "/api/strategic/generate-targeting", json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
