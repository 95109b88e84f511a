use super::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handler_health))
        .route("/api/models/status", get(handler_models_status))
}

async fn handler_health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let ready = state.models.is_ready().await;
    let status = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    let body = json!({
        "status": if ready { "healthy" } else { "unhealthy" },
        "modelsReady": ready,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    (status, Json(body))
}

async fn handler_models_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "success": true,
        "modelsReady": state.models.is_ready().await,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
