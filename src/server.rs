//! HTTP server for the movie vector search
//!
//! # Endpoints
//!
//! - `POST /search` - Nearest records for a query vector
//! - `GET /health` - Liveness probe

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::search::{SearchError, SearchHandler, SearchHit, DEFAULT_TOP_K};

/// Shared application state
///
/// Built once before the listener starts and never mutated afterwards, so
/// requests share it without locking.
pub struct AppState {
    pub handler: SearchHandler,
}

impl AppState {
    pub fn new(handler: SearchHandler) -> Arc<Self> {
        Arc::new(Self { handler })
    }
}

/// Search request body
#[derive(Debug, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Query vector (length must match `dim` in meta.json)
    pub vector: Vec<f32>,

    /// Number of results, 1..=200 (default: 50)
    #[serde(rename = "topK", default = "default_top_k")]
    pub top_k: i64,
}

fn default_top_k() -> i64 {
    DEFAULT_TOP_K as i64
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Error payload shared by every failing endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub detail: String,
}

fn error_response(status: StatusCode, code: &str, detail: String) -> Response {
    (
        status,
        Json(ErrorBody {
            code: code.to_string(),
            detail,
        }),
    )
        .into_response()
}

fn classify_search_error(e: &SearchError) -> (StatusCode, &'static str) {
    match e {
        SearchError::TopKOutOfRange(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_top_k"),
        SearchError::DimensionMismatch { .. } => (StatusCode::BAD_REQUEST, "dimension_mismatch"),
        SearchError::NonFinite => (StatusCode::BAD_REQUEST, "non_finite_vector"),
        SearchError::ZeroNorm => (StatusCode::BAD_REQUEST, "zero_norm_vector"),
        SearchError::InvalidDim => (StatusCode::INTERNAL_SERVER_ERROR, "invalid_meta_dim"),
        SearchError::IndexDimMismatch { .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, "index_dim_mismatch")
        }
    }
}

impl IntoResponse for SearchError {
    fn into_response(self) -> Response {
        let (status, code) = classify_search_error(&self);
        error_response(status, code, self.to_string())
    }
}

async fn search(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return error_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                "invalid_request",
                rejection.body_text(),
            )
        }
    };

    let started = Instant::now();
    let state_bg = state.clone();
    let result = tokio::task::spawn_blocking(move || {
        state_bg.handler.search(&body.vector, body.top_k)
    })
    .await;

    match result {
        Ok(Ok(results)) => {
            tracing::debug!(
                "Search returned {} results in {:.2}ms",
                results.len(),
                started.elapsed().as_secs_f64() * 1000.0
            );
            (StatusCode::OK, Json(SearchResponse { results })).into_response()
        }
        Ok(Err(e)) => {
            if e.is_caller_error() {
                tracing::debug!("Rejected search: {}", e);
            } else {
                tracing::error!("Search failed: {}", e);
            }
            e.into_response()
        }
        Err(e) => {
            tracing::error!("Search task failed: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "search task failed".to_string(),
            )
        }
    }
}

async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Create the axum router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/search", post(search))
        .route("/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until Ctrl-C or SIGTERM.
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> std::io::Result<()> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
