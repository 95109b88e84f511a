use super::AppState;
use crate::auth::Caller;
use crate::error::{ApiError, JsonBody, Result};
use crate::pipeline;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use rollcall_core::Role;
use rollcall_store::NewStudent;
use serde::Deserialize;
use serde_json::{json, Value};

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/register-student", post(handler_register))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RegisterRequest {
    student_name: String,
    student_id: String,
    department: String,
    year: String,
    division: String,
    semester: String,
    email: String,
    phone_number: String,
    images: Vec<String>,
}

impl RegisterRequest {
    /// Name of the first missing field, in form order.
    fn missing_field(&self) -> Option<&'static str> {
        [
            ("studentName", self.student_name.as_str()),
            ("studentId", self.student_id.as_str()),
            ("department", self.department.as_str()),
            ("year", self.year.as_str()),
            ("division", self.division.as_str()),
            ("semester", self.semester.as_str()),
            ("email", self.email.as_str()),
            ("phoneNumber", self.phone_number.as_str()),
        ]
        .into_iter()
        .find(|(_, v)| v.trim().is_empty())
        .map(|(name, _)| name)
        .or(self.images.is_empty().then_some("images"))
    }
}

async fn handler_register(
    State(state): State<AppState>,
    caller: Caller,
    JsonBody(req): JsonBody<RegisterRequest>,
) -> Result<Json<Value>> {
    caller.require(Role::Admin)?;
    if let Some(field) = req.missing_field() {
        return Err(ApiError::BadRequest(format!("{field} is required")));
    }

    let embeddings = pipeline::enroll(&state.models, &req.images).await?;
    let student_id = req.student_id.trim().to_string();
    state
        .store
        .insert_student(NewStudent {
            student_id: student_id.clone(),
            name: req.student_name.trim().to_string(),
            department: req.department.trim().to_string(),
            year: req.year.trim().to_string(),
            division: req.division.trim().to_string(),
            semester: req.semester.trim().to_string(),
            email: req.email.trim().to_string(),
            phone_number: req.phone_number.trim().to_string(),
            face_data: embeddings.into_iter().map(|e| Value::from(e.values)).collect(),
        })
        .await?;

    tracing::info!(student = %student_id, by = ?caller.email, "student registered");
    Ok(Json(json!({ "success": true, "studentId": student_id })))
}
