//! HTTP API.

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::aggregate::serialize;
use crate::config::Settings;
use crate::engines::flatten_json;
use crate::error::ApiError;
use crate::loader::{is_supported, load_pages_from_bytes, SUPPORTED_EXTENSIONS};
use crate::orchestrator::Orchestrator;
use crate::registry::EngineInfo;
use crate::request::{parse_list, ExtractionRequest, RequestedEngine};

const DEFAULT_OCR_ENGINE: &str = "tesseract";
const DEFAULT_NER_ENGINE: &str = "regex_ner";

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub settings: Arc<Settings>,
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.settings.max_upload_bytes;
    Router::new()
        .route("/health", get(health))
        .route("/engines", get(list_engines))
        .route("/process", post(process_file))
        .route("/entities", post(extract_entities))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn run(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let app = router(state);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    engines: usize,
}

/// Health check endpoint.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        engines: state.orchestrator.registry().len(),
    })
}

/// List registered engines.
async fn list_engines(State(state): State<AppState>) -> Json<Vec<EngineInfo>> {
    Json(state.orchestrator.registry().list())
}

#[derive(Serialize)]
struct ProcessResponse {
    filename: String,
    results: serde_json::Value,
}

/// Upload an image or PDF and run the requested engines over it.
async fn process_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ProcessResponse>, ApiError> {
    let mut filename = String::new();
    let mut file_data = Vec::new();
    let mut ocr_engines = Vec::new();
    let mut ner_engines = Vec::new();
    let mut languages = Vec::new();
    let mut ner_source = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidRequest(format!("Multipart error: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                filename = field.file_name().unwrap_or("document").to_string();
                file_data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::InvalidRequest(format!("Failed to read file: {}", e)))?
                    .to_vec();
            }
            "engines" | "ner" | "languages" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::InvalidRequest(format!("Failed to read {}: {}", name, e)))?;
                let list = parse_list(&value);
                match name.as_str() {
                    "engines" => ocr_engines.extend(list),
                    "ner" => ner_engines.extend(list),
                    _ => languages.extend(list),
                }
            }
            "ner_source" => {
                let value = field.text().await.map_err(|e| {
                    ApiError::InvalidRequest(format!("Failed to read ner_source: {}", e))
                })?;
                let value = value.trim();
                if !value.is_empty() {
                    ner_source = Some(value.to_string());
                }
            }
            _ => {}
        }
    }

    if file_data.is_empty() {
        return Err(ApiError::MissingFile);
    }
    if !is_supported(Path::new(&filename)) {
        return Err(ApiError::UnsupportedFormat(format!(
            "{} (supported: {})",
            filename,
            SUPPORTED_EXTENSIONS.join(", ")
        )));
    }

    info!("Received file: {} ({} bytes)", filename, file_data.len());

    let pages = load_pages_from_bytes(&filename, file_data).await.map_err(|e| {
        error!("Failed to load {}: {:#}", filename, e);
        ApiError::Load(format!("{:#}", e))
    })?;

    if ocr_engines.is_empty() && ner_engines.is_empty() {
        ocr_engines.push(DEFAULT_OCR_ENGINE.to_string());
    }
    if languages.is_empty() {
        languages = state.settings.default_languages.clone();
    }

    let mut request = ExtractionRequest::new(pages)
        .with_languages(languages)
        .with_engines(ocr_engines.into_iter().map(RequestedEngine::ocr))
        .with_engines(ner_engines.into_iter().map(RequestedEngine::ner));
    if let Some(source) = ner_source {
        request = request.with_ner_text_source(source);
    }

    let result = state.orchestrator.run(request).await?;

    Ok(Json(ProcessResponse {
        filename,
        results: serialize(&result),
    }))
}

#[derive(Deserialize)]
struct EntitiesRequest {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    json: Option<serde_json::Value>,
    #[serde(default)]
    engines: Vec<String>,
}

#[derive(Serialize)]
struct EntitiesResponse {
    results: serde_json::Value,
}

/// Run NER engines over supplied text or a flattened JSON document.
async fn extract_entities(
    State(state): State<AppState>,
    Json(body): Json<EntitiesRequest>,
) -> Result<Json<EntitiesResponse>, ApiError> {
    let text = match (body.text, body.json) {
        (Some(text), _) => text,
        (None, Some(json)) => flatten_json(&json),
        (None, None) => {
            return Err(ApiError::InvalidRequest(
                "Provide either `text` or `json`".to_string(),
            ))
        }
    };

    let engines = if body.engines.is_empty() {
        vec![DEFAULT_NER_ENGINE.to_string()]
    } else {
        body.engines
    };

    let request =
        ExtractionRequest::from_text(text).with_engines(engines.into_iter().map(RequestedEngine::ner));
    let result = state.orchestrator.run(request).await?;

    Ok(Json(EntitiesResponse {
        results: serialize(&result),
    }))
}
