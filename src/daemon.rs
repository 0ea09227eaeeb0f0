use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{Form, Json, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::{Config, Limits};
use crate::error::WaBotError;
use crate::Result;
use crate::providers::gateway::GatewayProvider;
use crate::providers::gemini::GeminiProvider;
use crate::providers::kv::KvStore;
use crate::providers::ProviderClient;
use crate::services::commands::CommandService;
use crate::services::knowledge::KnowledgeService;
use crate::services::logs::LogService;
use crate::services::memory::MemoryService;
use crate::services::transport::TwilioClient;
use crate::services::webhook::{InboundMessage, Orchestrator};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub memory: Arc<MemoryService>,
    pub knowledge: Arc<KnowledgeService>,
    pub logs: Arc<LogService>,
    pub kv: Arc<KvStore>,
    pub transport: Arc<TwilioClient>,
    pub limits: Limits,
    pub token: String,
}

pub fn build_state(config: &Config) -> AppState {
    let kv = Arc::new(KvStore::new(&config.kv));
    let gemini = GeminiProvider::new(&config.gemini, &config.limits, kv.clone());
    let gateway = GatewayProvider::new(&config.gateway, &config.limits);
    let providers = Arc::new(ProviderClient::new(gemini, gateway));
    let memory = Arc::new(MemoryService::new(
        kv.clone(),
        providers.clone(),
        config.memory.clone(),
    ));
    let knowledge = Arc::new(KnowledgeService::new(kv.clone()));
    let commands = Arc::new(CommandService::new(memory.clone(), knowledge.clone()));
    let transport = Arc::new(TwilioClient::new(&config.twilio));
    let logs = Arc::new(LogService::new(kv.clone()));
    let orchestrator = Arc::new(Orchestrator::new(
        memory.clone(),
        knowledge.clone(),
        commands,
        providers,
        transport.clone(),
        logs.clone(),
    ));

    AppState {
        orchestrator,
        memory,
        knowledge,
        logs,
        kv,
        transport,
        limits: config.limits.clone(),
        token: config.admin_token.clone().unwrap_or_default(),
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhook", post(webhook))
        .route("/system-prompt", get(get_system_prompt).post(set_system_prompt))
        .route("/logs", get(get_logs).delete(clear_logs))
        .route("/balances", get(balances))
        .route("/rag/upload", post(rag_upload))
        .route("/rag/list", get(rag_list))
        .route("/rag/search", post(rag_search))
        .route("/rag/delete", delete(rag_delete))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn authorize(headers: &HeaderMap, token: &str) -> std::result::Result<(), Response> {
    let expected = token.trim();
    let unauthorized = || {
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "Unauthorized".to_string(),
            }),
        )
            .into_response()
    };
    // Empty token fails closed.
    if expected.is_empty() {
        return Err(unauthorized());
    }

    let bearer = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .strip_prefix("Bearer ")
        .unwrap_or("")
        .trim();
    let api_key = headers
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .trim();

    if bearer == expected || api_key == expected {
        Ok(())
    } else {
        Err(unauthorized())
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Twilio posts form-encoded fields; everything is optional because a
/// payload with neither text nor media must still be acknowledged.
#[derive(Debug, Deserialize)]
pub struct TwilioWebhookForm {
    #[serde(rename = "From")]
    pub from: Option<String>,
    #[serde(rename = "To")]
    pub to: Option<String>,
    #[serde(rename = "Body")]
    pub body: Option<String>,
    #[serde(rename = "NumMedia")]
    pub num_media: Option<String>,
    #[serde(rename = "MediaUrl0")]
    pub media_url: Option<String>,
}

async fn webhook(
    State(state): State<AppState>,
    Form(form): Form<TwilioWebhookForm>,
) -> impl IntoResponse {
    let Some(from) = form.from.filter(|from| !from.trim().is_empty()) else {
        return (StatusCode::OK, Json(json!({"success": true})));
    };

    let inbound = InboundMessage {
        from,
        body: form.body,
        num_media: form
            .num_media
            .as_deref()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(0),
        media_url: form.media_url,
    };
    state.orchestrator.handle(inbound).await;
    (StatusCode::OK, Json(json!({"success": true})))
}

async fn get_system_prompt(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize(&headers, &state.token) {
        return response;
    }
    let prompt = state.memory.system_prompt().await;
    Json(json!({"prompt": prompt})).into_response()
}

#[derive(Deserialize)]
struct SystemPromptRequest {
    prompt: String,
}

async fn set_system_prompt(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SystemPromptRequest>,
) -> Response {
    if let Err(response) = authorize(&headers, &state.token) {
        return response;
    }
    if request.prompt.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "Invalid prompt".to_string(),
            }),
        )
            .into_response();
    }
    match state.kv.set("system:prompt", &request.prompt, None).await {
        Ok(()) => Json(json!({"success": true})).into_response(),
        Err(err) => internal_error(err),
    }
}

#[derive(Deserialize)]
struct LogsQuery {
    limit: Option<usize>,
}

async fn get_logs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<LogsQuery>,
) -> Response {
    if let Err(response) = authorize(&headers, &state.token) {
        return response;
    }
    let limit = query.limit.unwrap_or(50).min(100);
    match state.logs.list(limit).await {
        Ok(logs) => {
            let count = logs.len();
            Json(json!({"logs": logs, "count": count})).into_response()
        }
        Err(err) => internal_error(err),
    }
}

async fn clear_logs(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize(&headers, &state.token) {
        return response;
    }
    match state.logs.clear().await {
        Ok(()) => Json(json!({"success": true})).into_response(),
        Err(err) => internal_error(err),
    }
}

async fn balances(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize(&headers, &state.token) {
        return response;
    }
    let today = Utc::now().format("%Y-%m-%d").to_string();
    let gemini_used = counter_value(&state.kv, &format!("gemini:usage:{today}")).await;
    let kv_used = counter_value(&state.kv, &format!("upstash:commands:{today}")).await;
    let twilio = state.transport.balance().await;

    Json(json!({
        "gemini": {"used": gemini_used, "limit": state.limits.gemini_daily},
        "upstash": {"used": kv_used, "limit": state.limits.upstash_daily},
        "twilio": twilio,
    }))
    .into_response()
}

async fn counter_value(kv: &KvStore, key: &str) -> u64 {
    kv.get(key)
        .await
        .ok()
        .flatten()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(0)
}

#[derive(Deserialize)]
struct UploadRequest {
    filename: String,
    content: String,
    #[serde(default = "default_category")]
    category: String,
}

fn default_category() -> String {
    "general".to_string()
}

async fn rag_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<UploadRequest>,
) -> Response {
    if let Err(response) = authorize(&headers, &state.token) {
        return response;
    }
    if request.filename.trim().is_empty() || request.content.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "Filename and content required".to_string(),
            }),
        )
            .into_response();
    }
    match state
        .knowledge
        .upload(&request.filename, &request.content, &request.category)
        .await
    {
        Ok(document) => Json(json!({"success": true, "document": document})).into_response(),
        Err(err @ WaBotError::Runtime(_)) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: err.to_string(),
            }),
        )
            .into_response(),
        Err(err) => internal_error(err),
    }
}

async fn rag_list(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize(&headers, &state.token) {
        return response;
    }
    match state.knowledge.list().await {
        Ok(documents) => {
            Json(json!({"success": true, "count": documents.len(), "documents": documents}))
                .into_response()
        }
        Err(err) => internal_error(err),
    }
}

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(rename = "topK", default = "default_top_k")]
    top_k: usize,
}

fn default_top_k() -> usize {
    5
}

async fn rag_search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SearchRequest>,
) -> Response {
    if let Err(response) = authorize(&headers, &state.token) {
        return response;
    }
    if request.query.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "Query required".to_string(),
            }),
        )
            .into_response();
    }
    match state.knowledge.search(&request.query, request.top_k).await {
        Ok(results) => {
            Json(json!({"success": true, "count": results.len(), "results": results}))
                .into_response()
        }
        Err(err) => internal_error(err),
    }
}

#[derive(Deserialize)]
struct DeleteRequest {
    #[serde(rename = "documentId")]
    document_id: String,
}

async fn rag_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<DeleteRequest>,
) -> Response {
    if let Err(response) = authorize(&headers, &state.token) {
        return response;
    }
    match state.knowledge.delete(&request.document_id).await {
        Ok(Some(filename)) => Json(json!({
            "success": true,
            "message": format!("Document '{filename}' deleted successfully")
        }))
        .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "Document not found".to_string(),
            }),
        )
            .into_response(),
        Err(err) => internal_error(err),
    }
}

fn internal_error(err: WaBotError) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

pub async fn run(host: &str, port: u16, config: Config) -> Result<()> {
    run_with_shutdown(host, port, config, futures::future::pending::<()>()).await
}

pub async fn run_with_shutdown<F>(host: &str, port: u16, config: Config, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let state = build_state(&config);
    let app = build_router(state);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| WaBotError::Runtime(e.to_string()))?;
    tracing::info!(%addr, "webhook server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| WaBotError::Runtime(e.to_string()))?;

    Ok(())
}
