use super::AppState;
use crate::error::{ApiError, Result};
use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use rollcall_store::StudentQuery;
use serde_json::{json, Value};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/students/faces", get(handler_list))
        .route("/api/students/faces/:student_id", get(handler_get))
        .route("/api/students/count", get(handler_count))
}

async fn handler_list(State(state): State<AppState>, Query(query): Query<StudentQuery>) -> Result<Json<Value>> {
    let students = state.store.list_students(query).await?;
    tracing::debug!(count = students.len(), "listed students");
    Ok(Json(json!({
        "success": true,
        "count": students.len(),
        "students": students,
    })))
}

async fn handler_get(State(state): State<AppState>, Path(student_id): Path<String>) -> Result<Json<Value>> {
    let student = state
        .store
        .get_student(&student_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Student not found".into()))?;
    Ok(Json(json!({ "success": true, "student": student })))
}

async fn handler_count(State(state): State<AppState>) -> Result<Json<Value>> {
    let count = state.store.count_students().await?;
    Ok(Json(json!({ "success": true, "count": count })))
}

#[cfg(test)]
mod tests {
    use super::super::testing::Harness;
    use axum::http::StatusCode;
    use rollcall_store::NewStudent;
    use serde_json::json;

    async fn seed(h: &Harness) {
        for (id, name, dept) in [("MCA001", "Asha K", "MCA"), ("CSE042", "Keerthana R", "CSE")] {
            h.state
                .store
                .insert_student(NewStudent {
                    student_id: id.into(),
                    name: name.into(),
                    department: dept.into(),
                    year: "3rd Year".into(),
                    division: "G1".into(),
                    semester: "3".into(),
                    email: format!("{id}@x.edu"),
                    phone_number: "9000000000".into(),
                    face_data: vec![json!([0.6, 0.8])],
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_list_excludes_face_data_and_filters() {
        let h = Harness::new(vec![]).await;
        seed(&h).await;

        let (status, body) = h.get("/api/students/faces").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);
        assert!(body["students"][0].get("faceData").is_none());
        assert_eq!(body["students"][0]["faceSamples"], 1);

        let (_, body) = h.get("/api/students/faces?department=CSE").await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["students"][0]["studentId"], "CSE042");

        let (_, body) = h.get("/api/students/faces?search=ASHA").await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["students"][0]["studentId"], "MCA001");
    }

    #[tokio::test]
    async fn test_get_one_and_count() {
        let h = Harness::new(vec![]).await;
        seed(&h).await;

        let (status, body) = h.get("/api/students/faces/MCA001").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["student"]["studentName"], "Asha K");

        let (status, body) = h.get("/api/students/faces/nobody").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Student not found");

        let (_, body) = h.get("/api/students/count").await;
        assert_eq!(body["count"], 2);
    }
}
