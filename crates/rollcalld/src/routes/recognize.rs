use super::AppState;
use crate::error::{JsonBody, Result};
use crate::pipeline::{self, RecognizeRequest, RecognizeResponse};
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/recognize", post(handler_recognize))
}

async fn handler_recognize(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<RecognizeRequest>,
) -> Result<Json<RecognizeResponse>> {
    Ok(Json(pipeline::recognize(&state, req).await?))
}
