// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. Public endpoints (health) require no
// authentication. All other endpoints require a valid Bearer token checked
// via the `AuthBearer` extractor.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        // ── Authenticated ───────────────────────────────────────────
        .route("/api/v1/status", get(status))
        .route("/api/v1/config", get(config))
        .route("/api/v1/control/stop", post(control_stop))
        // ── Middleware & State ───────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let resp = HealthResponse {
        status: "ok",
        uptime_secs: state.start_time.elapsed().as_secs(),
        server_time: chrono::Utc::now().timestamp_millis(),
    };
    Json(resp)
}

// =============================================================================
// Status snapshot (authenticated)
// =============================================================================

async fn status(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.build_status_snapshot())
}

// =============================================================================
// Config (authenticated)
// =============================================================================

async fn config(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let config = state.runtime_config.read().clone();
    Json(config)
}

// =============================================================================
// Control (authenticated)
// =============================================================================

#[derive(Deserialize, Default)]
struct StopRequest {
    /// Stop only this symbol's updater; omitted stops everything.
    #[serde(default)]
    symbol: Option<String>,
}

#[derive(Serialize)]
struct StopResponse {
    stopped: String,
}

async fn control_stop(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    body: Option<Json<StopRequest>>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let req = body.map(|Json(r)| r).unwrap_or_default();

    match req.symbol {
        Some(symbol) => {
            if !state.request_stop(&symbol) {
                return Err((
                    StatusCode::NOT_FOUND,
                    Json(serde_json::json!({
                        "error": format!("unknown symbol: {symbol}"),
                    })),
                ));
            }
            info!(symbol = %symbol, "symbol stopped via API");
            Ok(Json(StopResponse { stopped: symbol }))
        }
        None => {
            state.request_stop_all();
            info!("all updaters stopped via API");
            Ok(Json(StopResponse {
                stopped: "all".to_string(),
            }))
        }
    }
}
