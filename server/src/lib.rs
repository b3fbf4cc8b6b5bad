use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sift_core::persist::{load_snapshot, save_snapshot, IndexPaths, MetaFile};
use sift_core::{
    Document, EngineConfig, NewDocument, SearchEngine, SearchRequest, SearchResults, SearchScope, Suggestion,
    SuggestAlgorithm, SuggestionSource,
};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

type ApiError = (StatusCode, String);

const MAX_PAGE: usize = 100;

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub fuzzy: bool,
    #[serde(default)]
    pub scope: SearchScope,
    /// Comma-separated document types.
    pub types: Option<String>,
    /// Unix seconds, inclusive.
    pub after: Option<i64>,
    pub before: Option<i64>,
    #[serde(default)]
    pub explain: bool,
}
fn default_limit() -> usize { 10 }

impl SearchParams {
    fn into_request(self) -> SearchRequest {
        let file_types = self
            .types
            .map(|t| t.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect())
            .unwrap_or_default();
        SearchRequest {
            query: self.q,
            limit: self.limit.min(MAX_PAGE),
            offset: self.offset,
            fuzzy: self.fuzzy,
            scope: self.scope,
            file_types,
            uploaded_after: self.after,
            uploaded_before: self.before,
            explain: self.explain,
            context: None,
        }
    }
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub took_s: f64,
    #[serde(flatten)]
    pub results: SearchResults,
}

#[derive(Deserialize)]
pub struct AutocompleteParams {
    pub q: String,
    pub limit: Option<usize>,
    pub algorithm: Option<SuggestAlgorithm>,
}

#[derive(Serialize)]
pub struct AutocompleteResponse {
    pub query: String,
    pub suggestions: Vec<Suggestion>,
}

#[derive(Deserialize)]
#[serde(untagged)]
pub enum DocumentBatch {
    Many(Vec<NewDocument>),
    One(NewDocument),
}

#[derive(Serialize)]
pub struct BatchResponse {
    pub indexed: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Deserialize)]
pub struct NewSuggestion {
    pub text: String,
    #[serde(default)]
    pub score: f32,
    pub source: Option<SuggestionSource>,
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SearchEngine>,
    pub index_paths_root: PathBuf,
    pub admin_token: Option<String>,
}

/// Load the snapshot under `index_dir` (or start empty) and build the router.
pub fn build_app(index_dir: String) -> Result<Router> {
    let paths = IndexPaths::new(&index_dir);
    let engine = if paths.exists() {
        load_snapshot(&paths, None)?
    } else {
        tracing::info!(%index_dir, "no snapshot found, starting empty");
        SearchEngine::new(EngineConfig::default())?
    };
    let admin_token = std::env::var("ADMIN_TOKEN").ok();
    let state = AppState { engine: Arc::new(engine), index_paths_root: PathBuf::from(&index_dir), admin_token };
    Ok(router(state))
}

pub fn router(state: AppState) -> Router {
    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", get(search_handler))
        .route("/autocomplete", get(autocomplete_handler))
        .route("/stats", get(stats_handler))
        .route("/doc/:doc_id", get(doc_handler).delete(delete_doc))
        .route("/doc/:doc_id/click", post(click_handler))
        .route("/documents", post(add_documents))
        .route("/suggestions", post(add_suggestion))
        .route("/index/commit", post(index_commit))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn search_handler(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Json<SearchResponse> {
    let start = std::time::Instant::now();
    let results = state.engine.execute(&params.into_request());
    Json(SearchResponse { took_s: start.elapsed().as_secs_f64(), results })
}

pub async fn autocomplete_handler(
    State(state): State<AppState>,
    Query(params): Query<AutocompleteParams>,
) -> Json<AutocompleteResponse> {
    let limit = params.limit.unwrap_or(state.engine.config().autocomplete.max_suggestions);
    let suggestions = match params.algorithm {
        Some(a) => state.engine.suggest_with(&params.q, a, limit),
        None => state.engine.autocomplete(&params.q, limit),
    };
    Json(AutocompleteResponse { query: params.q, suggestions })
}

async fn stats_handler(State(state): State<AppState>) -> Json<sift_core::EngineStats> {
    Json(state.engine.stats())
}

pub async fn doc_handler(State(state): State<AppState>, Path(doc_id): Path<String>) -> Result<Json<Document>, ApiError> {
    state.engine.document(&doc_id).map(Json).ok_or_else(|| not_found(&doc_id))
}

async fn click_handler(State(state): State<AppState>, Path(doc_id): Path<String>) -> Result<StatusCode, ApiError> {
    if state.engine.record_click(&doc_id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(&doc_id))
    }
}

fn not_found(doc_id: &str) -> ApiError {
    (StatusCode::NOT_FOUND, format!("document {doc_id:?} not found"))
}

// --- Admin endpoints ---
async fn delete_doc(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(doc_id): Path<String>,
) -> Result<Json<Document>, ApiError> {
    authorize(&state, &headers)?;
    state.engine.remove_document(&doc_id).map(Json).ok_or_else(|| not_found(&doc_id))
}

async fn add_documents(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(batch): Json<DocumentBatch>,
) -> Result<Json<BatchResponse>, ApiError> {
    authorize(&state, &headers)?;
    let docs = match batch {
        DocumentBatch::Many(docs) => docs,
        DocumentBatch::One(doc) => vec![doc],
    };
    let now = sift_core::now();
    let mut resp = BatchResponse { indexed: Vec::new(), errors: Vec::new() };
    for mut doc in docs {
        if doc.uploaded_at == 0 {
            doc.uploaded_at = now;
        }
        if doc.size == 0 {
            doc.size = doc.content.len() as u64;
        }
        match state.engine.add_document(doc) {
            Ok(id) => resp.indexed.push(id),
            Err(err) => resp.errors.push(err.to_string()),
        }
    }
    if resp.indexed.is_empty() && !resp.errors.is_empty() {
        return Err((StatusCode::UNPROCESSABLE_ENTITY, resp.errors.join("; ")));
    }
    Ok(Json(resp))
}

async fn add_suggestion(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<NewSuggestion>,
) -> Result<Json<serde_json::Value>, ApiError> {
    authorize(&state, &headers)?;
    let source = body.source.unwrap_or(SuggestionSource::Other);
    let text = state
        .engine
        .add_suggestion(&body.text, body.score, source)
        .map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;
    Ok(Json(serde_json::json!({ "text": text })))
}

async fn index_commit(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<MetaFile>, ApiError> {
    authorize(&state, &headers)?;
    let engine = Arc::clone(&state.engine);
    let paths = IndexPaths::new(&state.index_paths_root);
    let meta = tokio::task::spawn_blocking(move || save_snapshot(&engine, &paths))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")))?;
    Ok(Json(meta))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let required = match &state.admin_token {
        Some(t) => t,
        None => return Err((StatusCode::UNAUTHORIZED, "ADMIN_TOKEN not set".into())),
    };
    let provided = headers.get("X-ADMIN-TOKEN").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided == required {
        Ok(())
    } else {
        tracing::warn!("rejected admin request");
        Err((StatusCode::UNAUTHORIZED, "invalid admin token".into()))
    }
}
