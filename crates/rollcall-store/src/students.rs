use crate::{to_json, Result, SqliteStore, StoreError};
use chrono::{Local, NaiveDateTime};
use rollcall_core::matcher::parse_stored_embedding;
use rollcall_core::timetable::ClassKey;
use rollcall_core::{GalleryEntry, StudentIdentity};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, OptionalExtension, ToSql};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StudentStatus {
    Active,
    Pending,
    Inactive,
}

impl StudentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StudentStatus::Active => "active",
            StudentStatus::Pending => "pending",
            StudentStatus::Inactive => "inactive",
        }
    }
}

impl ToSql for StudentStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for StudentStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "active" => Ok(StudentStatus::Active),
            "pending" => Ok(StudentStatus::Pending),
            "inactive" => Ok(StudentStatus::Inactive),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

/// A student to enroll, with their stored face entries.
#[derive(Debug, Clone)]
pub struct NewStudent {
    pub student_id: String,
    pub name: String,
    pub department: String,
    pub year: String,
    pub division: String,
    pub semester: String,
    pub email: String,
    pub phone_number: String,
    pub face_data: Vec<Value>,
}

/// Student as listed to clients; face data is never included.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProfile {
    pub student_id: String,
    pub student_name: String,
    pub department: String,
    pub year: String,
    pub division: String,
    pub semester: String,
    pub email: String,
    pub phone_number: String,
    pub status: StudentStatus,
    pub face_samples: usize,
    pub created_at: NaiveDateTime,
}

impl StudentProfile {
    pub fn class(&self) -> ClassKey {
        ClassKey {
            department: self.department.clone(),
            year: self.year.clone(),
            division: self.division.clone(),
        }
    }
}

/// Filters for listing students. Empty fields match everything.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StudentQuery {
    pub department: Option<String>,
    pub year: Option<String>,
    pub division: Option<String>,
    /// Case-insensitive substring of name or student id.
    pub search: Option<String>,
}

/// Stored face entries of one student, split by validity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceDataHealth {
    pub student_id: String,
    pub student_name: String,
    pub total: usize,
    pub corrupt: usize,
}

const PROFILE_COLUMNS: &str =
    "student_id, name, department, year, division, semester, email, phone_number, status, face_data, created_at";

fn profile_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StudentProfile> {
    let face_data: Vec<Value> = face_data_column(row, 9)?;
    Ok(StudentProfile {
        student_id: row.get(0)?,
        student_name: row.get(1)?,
        department: row.get(2)?,
        year: row.get(3)?,
        division: row.get(4)?,
        semester: row.get(5)?,
        email: row.get(6)?,
        phone_number: row.get(7)?,
        status: row.get(8)?,
        face_samples: face_data.len(),
        created_at: row.get(10)?,
    })
}

/// Face data column as a list of entries. A column that is not a JSON array
/// is kept as one (corrupt) entry, so one bad row never fails a scan.
fn face_data_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Vec<Value>> {
    let raw: String = row.get(idx)?;
    Ok(match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Array(items)) => items,
        Ok(Value::Null) => Vec::new(),
        Ok(other) => vec![other],
        Err(err) => {
            tracing::warn!(error = %err, "unparsable face data column");
            vec![Value::String(raw)]
        }
    })
}

fn like_pattern(search: &str) -> String {
    let escaped = search
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn non_empty(s: &Option<String>) -> Option<String> {
    s.as_ref().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

enum Conflict {
    StudentId,
    Email,
}

impl SqliteStore {
    /// Enroll a student. Student id and email must both be unused.
    pub async fn insert_student(&self, student: NewStudent) -> Result<()> {
        let face_data = to_json(&student.face_data)?;
        let id = student.student_id.clone();
        let email = student.email.clone();
        let created_at = Local::now().naive_local();

        let conflict = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let id_taken: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM students WHERE student_id = ?1)",
                    [&student.student_id],
                    |row| row.get(0),
                )?;
                if id_taken {
                    return Ok(Some(Conflict::StudentId));
                }
                let email_taken: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM students WHERE lower(email) = lower(?1))",
                    [&student.email],
                    |row| row.get(0),
                )?;
                if email_taken {
                    return Ok(Some(Conflict::Email));
                }
                tx.execute(
                    "INSERT INTO students (student_id, name, department, year, division, semester,
                        email, phone_number, status, face_data, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        student.student_id,
                        student.name,
                        student.department,
                        student.year,
                        student.division,
                        student.semester,
                        student.email,
                        student.phone_number,
                        StudentStatus::Active,
                        face_data,
                        created_at,
                    ],
                )?;
                tx.commit()?;
                Ok(None)
            })
            .await?;

        match conflict {
            Some(Conflict::StudentId) => Err(StoreError::DuplicateStudentId(id)),
            Some(Conflict::Email) => Err(StoreError::DuplicateEmail(email)),
            None => {
                tracing::info!(student = %id, "student enrolled");
                Ok(())
            }
        }
    }

    pub async fn get_student(&self, student_id: &str) -> Result<Option<StudentProfile>> {
        let student_id = student_id.to_string();
        let profile = self
            .conn
            .call(move |conn| {
                let sql = format!("SELECT {PROFILE_COLUMNS} FROM students WHERE student_id = ?1");
                Ok(conn.query_row(&sql, [&student_id], profile_from_row).optional()?)
            })
            .await?;
        Ok(profile)
    }

    pub async fn list_students(&self, query: StudentQuery) -> Result<Vec<StudentProfile>> {
        let department = non_empty(&query.department);
        let year = non_empty(&query.year);
        let division = non_empty(&query.division);
        let search = non_empty(&query.search).map(|s| like_pattern(&s));

        let students = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT {PROFILE_COLUMNS} FROM students
                     WHERE (?1 IS NULL OR department = ?1)
                       AND (?2 IS NULL OR year = ?2)
                       AND (?3 IS NULL OR division = ?3)
                       AND (?4 IS NULL OR lower(name) LIKE ?4 ESCAPE '\\' OR lower(student_id) LIKE ?4 ESCAPE '\\')
                     ORDER BY rowid"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![department, year, division, search], profile_from_row)?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await?;
        Ok(students)
    }

    pub async fn count_students(&self) -> Result<u64> {
        let count = self
            .conn
            .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM students", [], |row| row.get::<_, i64>(0))?))
            .await?;
        Ok(count.max(0) as u64)
    }

    /// Class of a student, for session labeling.
    pub async fn class_of(&self, student_id: &str) -> Result<Option<ClassKey>> {
        Ok(self.get_student(student_id).await?.map(|p| p.class()))
    }

    /// Every student with at least one stored face entry, in enrollment order.
    pub async fn gallery(&self) -> Result<Vec<GalleryEntry>> {
        let entries = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT student_id, name, face_data FROM students
                     WHERE face_data IS NOT NULL AND face_data != '[]'
                     ORDER BY rowid",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(GalleryEntry {
                        identity: StudentIdentity {
                            student_id: row.get(0)?,
                            student_name: row.get(1)?,
                        },
                        face_data: face_data_column(row, 2)?,
                    })
                })?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await?;
        Ok(entries.into_iter().filter(|e| !e.face_data.is_empty()).collect())
    }

    /// Count valid and corrupt face entries per student.
    pub async fn face_data_health(&self) -> Result<Vec<FaceDataHealth>> {
        let gallery = self.gallery().await?;
        Ok(gallery
            .into_iter()
            .map(|entry| FaceDataHealth {
                corrupt: entry
                    .face_data
                    .iter()
                    .filter(|v| parse_stored_embedding(v).is_err())
                    .count(),
                total: entry.face_data.len(),
                student_id: entry.identity.student_id,
                student_name: entry.identity.student_name,
            })
            .collect())
    }

    /// Drop corrupt face entries, keeping valid ones in order. Returns the
    /// students that changed and how many entries each lost.
    pub async fn prune_corrupt_face_data(&self) -> Result<Vec<(String, usize)>> {
        let pruned = self
            .conn
            .call(|conn| {
                let tx = conn.transaction()?;
                let mut changed = Vec::new();
                {
                    let mut select = tx.prepare("SELECT student_id, face_data FROM students ORDER BY rowid")?;
                    let rows = select
                        .query_map([], |row| Ok((row.get::<_, String>(0)?, face_data_column(row, 1)?)))?
                        .collect::<rusqlite::Result<Vec<_>>>()?;

                    let mut update = tx.prepare("UPDATE students SET face_data = ?1 WHERE student_id = ?2")?;
                    for (student_id, face_data) in rows {
                        let before = face_data.len();
                        let kept: Vec<Value> = face_data
                            .into_iter()
                            .filter(|v| parse_stored_embedding(v).is_ok())
                            .collect();
                        if kept.len() != before {
                            update.execute(params![to_json(&kept)?, student_id])?;
                            changed.push((student_id, before - kept.len()));
                        }
                    }
                }
                tx.commit()?;
                Ok(changed)
            })
            .await?;

        for (student, removed) in &pruned {
            tracing::info!(student = %student, removed, "pruned corrupt face data");
        }
        Ok(pruned)
    }
}
