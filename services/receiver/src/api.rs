use crate::config::ApiConfig;
use crate::dispatch::{ActionDispatcher, QueryParams};
use crate::ingest::{ingest, IngestError};
use crate::key::TimeSource;
use crate::storage::StorageBackend;
use anyhow::{Context, Result};
use axum::{
    extract::{Form, Query, State},
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

/// Form field carrying the record literal on POST.
pub const MESSAGE_FIELD: &str = "msg";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn StorageBackend>,
    pub clock: Arc<dyn TimeSource>,
    pub dispatcher: Arc<ActionDispatcher>,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route(
            "/",
            get(run_actions)
                .post(receive_record)
                .put(not_implemented)
                .delete(not_implemented),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "receiver-service",
        "backend": state.storage.name()
    }))
}

/// Run the requested actions, or echo the query parameters
#[instrument(skip(state, pairs), fields(params = pairs.len()))]
async fn run_actions(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> String {
    let params: QueryParams = pairs.into_iter().collect();
    state.dispatcher.handle(&params, state.storage.as_ref()).await
}

/// Store the record carried in the `msg` form field
#[instrument(skip(state, fields))]
async fn receive_record(
    State(state): State<AppState>,
    Form(fields): Form<Vec<(String, String)>>,
) -> (StatusCode, String) {
    let Some((_, payload)) = fields.iter().find(|(name, _)| name == MESSAGE_FIELD) else {
        warn!("POST without a msg field");
        return (
            StatusCode::BAD_REQUEST,
            format!("Missing form field {MESSAGE_FIELD:?}"),
        );
    };

    match ingest(payload, state.storage.as_ref(), state.clock.as_ref()).await {
        Ok(confirmation) => (StatusCode::OK, confirmation),
        Err(e) => (ingest_error_status(&e), e.to_string()),
    }
}

async fn not_implemented(method: Method) -> (StatusCode, String) {
    (
        StatusCode::NOT_IMPLEMENTED,
        format!("Method {method} is not implemented"),
    )
}

fn ingest_error_status(error: &IngestError) -> StatusCode {
    match error {
        IngestError::BadPayload(_) => StatusCode::BAD_REQUEST,
        IngestError::StoreFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Start the API server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting receiver API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}
