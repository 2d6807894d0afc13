//! HTTP surface: `POST /extract-bill-data`, `GET /health` and `GET /`.
//!
//! Handlers are thin. All the work, and every failure mode, lives in
//! [`ExtractionService`]; the extract endpoint always answers 200 with a
//! [`ResponseEnvelope`]. Only a body the JSON extractor cannot read is
//! rejected with a 4xx before the service sees it.

use crate::extract::ExtractionService;
use crate::output::{DocumentRequest, ResponseEnvelope};
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// State shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ExtractionService>,
}

impl AppState {
    pub fn new(service: ExtractionService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}

/// Body of `GET /`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootResponse {
    pub status: String,
    pub message: String,
    pub version: String,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub api_key_configured: bool,
    pub model: String,
    pub provider: String,
}

/// Build the API router with all endpoints.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/extract-bill-data", post(extract_bill_data))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn start_server(addr: &str, state: AppState) -> Result<(), std::io::Error> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}

async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        status: "ok".into(),
        message: "Medical bill extraction API. POST a document URL to /extract-bill-data".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let config = state.service.config();
    Json(HealthResponse {
        status: "healthy".into(),
        api_key_configured: state.service.api_key_configured(),
        model: config.model_name().to_string(),
        provider: config.provider_label().to_string(),
    })
}

async fn extract_bill_data(
    State(state): State<AppState>,
    Json(request): Json<DocumentRequest>,
) -> Json<ResponseEnvelope> {
    Json(state.service.process(&request.document).await)
}
