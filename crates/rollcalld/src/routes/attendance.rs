use super::AppState;
use crate::error::{ApiError, JsonBody, Result};
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use rollcall_core::ledger::{AttendanceMark, AttendanceRecord, DEFAULT_PERIOD, DEFAULT_SESSION_NAME};
use rollcall_core::timetable::{resolve_session, SessionLabel};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/attendance/mark", post(handler_mark))
        .route("/api/attendance/today", get(handler_today))
        .route("/api/attendance/current-subject", post(handler_current_subject))
}

/// Attendance record as sent to clients, with the derived duration in
/// minutes.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordView {
    #[serde(flatten)]
    pub record: AttendanceRecord,
    pub duration_minutes: f64,
}

impl From<AttendanceRecord> for RecordView {
    fn from(record: AttendanceRecord) -> Self {
        let duration_minutes = record.duration_minutes();
        Self {
            record,
            duration_minutes,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkRequest {
    #[serde(default)]
    student_id: Option<String>,
    #[serde(default)]
    student_name: Option<String>,
    #[serde(default)]
    session_name: Option<String>,
    #[serde(default)]
    period: Option<String>,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

async fn handler_mark(State(state): State<AppState>, JsonBody(req): JsonBody<MarkRequest>) -> Result<Json<Value>> {
    let student_id =
        non_empty(req.student_id).ok_or_else(|| ApiError::BadRequest("Student ID required".into()))?;

    let student_name = match non_empty(req.student_name) {
        Some(name) => name,
        None => state
            .store
            .get_student(&student_id)
            .await?
            .map(|p| p.student_name)
            .unwrap_or_else(|| student_id.clone()),
    };

    let mark = AttendanceMark::new(student_id, student_name)
        .session(non_empty(req.session_name).unwrap_or_else(|| DEFAULT_SESSION_NAME.to_string()))
        .period(non_empty(req.period).unwrap_or_else(|| DEFAULT_PERIOD.to_string()));

    let outcome = state.store.mark_attendance(&mark, state.clock.now()).await?;
    let message = if outcome.duplicate {
        "Attendance updated (duration tracked)"
    } else {
        "Attendance marked successfully"
    };
    Ok(Json(json!({
        "success": true,
        "message": message,
        "duplicate": outcome.duplicate,
        "record": RecordView::from(outcome.record),
    })))
}

async fn handler_today(State(state): State<AppState>) -> Result<Json<Value>> {
    let today = state.clock.now().date();
    let records: Vec<RecordView> = state
        .store
        .attendance_on(today)
        .await?
        .into_iter()
        .map(RecordView::from)
        .collect();
    Ok(Json(json!({
        "success": true,
        "count": records.len(),
        "date": today,
        "records": records,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrentSubjectRequest {
    #[serde(default)]
    student_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CurrentSubjectResponse {
    success: bool,
    student_id: String,
    #[serde(flatten)]
    label: SessionLabel,
}

async fn handler_current_subject(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<CurrentSubjectRequest>,
) -> Result<Json<CurrentSubjectResponse>> {
    let student_id =
        non_empty(req.student_id).ok_or_else(|| ApiError::BadRequest("studentId is required".into()))?;
    let class = state
        .store
        .class_of(&student_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Student not found".into()))?;
    let timetable = state.store.timetable_for(&class).await?;
    let label = resolve_session(timetable.as_ref(), state.clock.now());
    tracing::debug!(student = %student_id, status = ?label.status, subject = %label.subject, "resolved session");
    Ok(Json(CurrentSubjectResponse {
        success: true,
        student_id,
        label,
    }))
}

#[cfg(test)]
mod tests {
    use super::super::testing::Harness;
    use axum::http::StatusCode;
    use chrono::NaiveTime;
    use rollcall_core::timetable::{ClassKey, Period, Timetable};
    use rollcall_store::NewStudent;
    use serde_json::json;

    async fn enroll_plain(h: &Harness, id: &str) {
        h.state
            .store
            .insert_student(NewStudent {
                student_id: id.into(),
                name: "Asha K".into(),
                department: "MCA".into(),
                year: "3rd Year".into(),
                division: "G1".into(),
                semester: "3".into(),
                email: format!("{id}@x.edu"),
                phone_number: "9000000000".into(),
                face_data: vec![],
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_mark_defaults_and_duplicate() {
        let h = Harness::new(vec![]).await;
        enroll_plain(&h, "MCA001").await;

        let (status, body) = h.post("/api/attendance/mark", json!({ "studentId": "MCA001" }), &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["duplicate"], false);
        assert_eq!(body["record"]["studentName"], "Asha K");
        assert_eq!(body["record"]["sessionName"], "Live Detection");
        assert_eq!(body["record"]["period"], "N/A");
        assert_eq!(body["record"]["time"], "10:15:00");
        assert_eq!(body["record"]["durationMinutes"], 0.0);

        h.clock.advance(600);
        let (_, body) = h.post("/api/attendance/mark", json!({ "studentId": "MCA001" }), &[]).await;
        assert_eq!(body["duplicate"], true);
        assert_eq!(body["message"], "Attendance updated (duration tracked)");
        assert_eq!(body["record"]["durationMinutes"], 10.0);

        let (_, today) = h.get("/api/attendance/today").await;
        assert_eq!(today["count"], 1);
        assert_eq!(today["date"], "2026-03-02");
    }

    #[tokio::test]
    async fn test_mark_requires_student_id() {
        let h = Harness::new(vec![]).await;
        let (status, body) = h.post("/api/attendance/mark", json!({ "studentName": "x" }), &[]).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Student ID required");
    }

    #[tokio::test]
    async fn test_current_subject_from_timetable() {
        let h = Harness::new(vec![]).await;
        enroll_plain(&h, "MCA001").await;

        let (_, body) = h
            .post("/api/attendance/current-subject", json!({ "studentId": "MCA001" }), &[])
            .await;
        assert_eq!(body["status"], "no_timetable");
        assert_eq!(body["subject"], "General Attendance");

        h.state
            .store
            .upsert_timetable(Timetable {
                class: ClassKey {
                    department: "MCA".into(),
                    year: "3rd Year".into(),
                    division: "G1".into(),
                },
                periods: vec![Period {
                    period_number: 2,
                    subject: "Machine Learning".into(),
                    teacher: "Ms. Umarani V".into(),
                    start_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                    end_time: NaiveTime::from_hms_opt(10, 50, 0).unwrap(),
                    days: vec!["Monday".into()],
                }],
            })
            .await
            .unwrap();

        let (status, body) = h
            .post("/api/attendance/current-subject", json!({ "studentId": "MCA001" }), &[])
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "active_class");
        assert_eq!(body["subject"], "Machine Learning");
        assert_eq!(body["period"], "2");
        assert_eq!(body["day"], "Monday");
    }

    #[tokio::test]
    async fn test_current_subject_unknown_student() {
        let h = Harness::new(vec![]).await;
        let (status, _) = h
            .post("/api/attendance/current-subject", json!({ "studentId": "ghost" }), &[])
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
