use crate::{Result, SqliteStore};
use chrono::{NaiveDate, NaiveDateTime};
use rollcall_core::ledger::{apply_mark, AttendanceMark, AttendanceRecord, AttendanceStatus, MarkOutcome};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};

const RECORD_COLUMNS: &str = "id, student_id, student_name, date, session_name, period, time,
    first_seen, last_seen, duration_seconds, status, method";

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    let status: String = row.get(10)?;
    let status = match status.as_str() {
        "present" => AttendanceStatus::Present,
        other => {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                10,
                Type::Text,
                format!("unknown attendance status {other:?}").into(),
            ))
        }
    };
    Ok(AttendanceRecord {
        id: row.get(0)?,
        student_id: row.get(1)?,
        student_name: row.get(2)?,
        date: row.get(3)?,
        session_name: row.get(4)?,
        period: row.get(5)?,
        time: row.get(6)?,
        first_seen: row.get(7)?,
        last_seen: row.get(8)?,
        duration_seconds: row.get(9)?,
        status,
        method: row.get(11)?,
    })
}

impl SqliteStore {
    /// Record a detection at `now`. The first mark for a (student, date,
    /// session) opens a record; later ones only extend it.
    pub async fn mark_attendance(&self, mark: &AttendanceMark, now: NaiveDateTime) -> Result<MarkOutcome> {
        let mark = mark.clone();
        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let existing = tx
                    .query_row(
                        &format!(
                            "SELECT {RECORD_COLUMNS} FROM attendance_records
                             WHERE student_id = ?1 AND date = ?2 AND session_name = ?3"
                        ),
                        params![mark.student_id, now.date(), mark.session_name],
                        record_from_row,
                    )
                    .optional()?;

                let outcome = apply_mark(existing, &mark, now, || uuid::Uuid::new_v4().to_string());
                let r = &outcome.record;
                if outcome.duplicate {
                    tx.execute(
                        "UPDATE attendance_records SET last_seen = ?1, duration_seconds = ?2 WHERE id = ?3",
                        params![r.last_seen, r.duration_seconds, r.id],
                    )?;
                } else {
                    tx.execute(
                        "INSERT INTO attendance_records (id, student_id, student_name, date, session_name,
                            period, time, first_seen, last_seen, duration_seconds, status, method)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                        params![
                            r.id,
                            r.student_id,
                            r.student_name,
                            r.date,
                            r.session_name,
                            r.period,
                            r.time,
                            r.first_seen,
                            r.last_seen,
                            r.duration_seconds,
                            r.status.as_str(),
                            r.method,
                        ],
                    )?;
                }
                tx.commit()?;
                Ok(outcome)
            })
            .await?;

        tracing::debug!(
            student = %outcome.record.student_id,
            session = %outcome.record.session_name,
            duplicate = outcome.duplicate,
            "attendance marked"
        );
        Ok(outcome)
    }

    /// All records for `date`, earliest first.
    pub async fn attendance_on(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>> {
        let records = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {RECORD_COLUMNS} FROM attendance_records WHERE date = ?1 ORDER BY first_seen, rowid"
                ))?;
                let rows = stmt.query_map([date], record_from_row)?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await?;
        Ok(records)
    }
}
