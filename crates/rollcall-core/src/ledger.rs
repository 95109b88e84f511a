//! Attendance ledger rules.
//!
//! One record per (student, date, session). The first detection opens the
//! record; every later detection that day only moves `last_seen` forward and
//! recomputes the duration from `first_seen`.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

pub const DEFAULT_SESSION_NAME: &str = "Live Detection";
pub const DEFAULT_PERIOD: &str = "N/A";
pub const METHOD_FACE_RECOGNITION: &str = "face_recognition";

/// A request to record a detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceMark {
    pub student_id: String,
    pub student_name: String,
    pub session_name: String,
    pub period: String,
}

impl AttendanceMark {
    pub fn new(student_id: impl Into<String>, student_name: impl Into<String>) -> Self {
        Self {
            student_id: student_id.into(),
            student_name: student_name.into(),
            session_name: DEFAULT_SESSION_NAME.to_string(),
            period: DEFAULT_PERIOD.to_string(),
        }
    }

    pub fn session(mut self, session_name: impl Into<String>) -> Self {
        self.session_name = session_name.into();
        self
    }

    pub fn period(mut self, period: impl Into<String>) -> Self {
        self.period = period.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub date: NaiveDate,
    pub session_name: String,
    pub period: String,
    /// Wall-clock time of the first detection, `HH:MM:SS`.
    pub time: String,
    pub first_seen: NaiveDateTime,
    pub last_seen: NaiveDateTime,
    pub duration_seconds: f64,
    pub status: AttendanceStatus,
    pub method: String,
}

impl AttendanceRecord {
    /// absent -> present: open a record at `now`.
    pub fn open(id: String, mark: &AttendanceMark, now: NaiveDateTime) -> Self {
        Self {
            id,
            student_id: mark.student_id.clone(),
            student_name: mark.student_name.clone(),
            date: now.date(),
            session_name: mark.session_name.clone(),
            period: mark.period.clone(),
            time: now.format("%H:%M:%S").to_string(),
            first_seen: now,
            last_seen: now,
            duration_seconds: 0.0,
            status: AttendanceStatus::Present,
            method: METHOD_FACE_RECOGNITION.to_string(),
        }
    }

    /// present -> present: advance `last_seen` (never backwards) and
    /// recompute the duration.
    pub fn touch(&mut self, now: NaiveDateTime) {
        if now > self.last_seen {
            self.last_seen = now;
        }
        self.duration_seconds = (self.last_seen - self.first_seen)
            .num_milliseconds()
            .max(0) as f64
            / 1000.0;
    }

    /// Duration in minutes, rounded to two decimals.
    pub fn duration_minutes(&self) -> f64 {
        (self.duration_seconds / 60.0 * 100.0).round() / 100.0
    }
}

/// Result of applying a mark to the ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkOutcome {
    pub record: AttendanceRecord,
    /// `true` when the record already existed and was only updated.
    pub duplicate: bool,
}

/// Apply a mark to the current ledger state for its key.
pub fn apply_mark(
    existing: Option<AttendanceRecord>,
    mark: &AttendanceMark,
    now: NaiveDateTime,
    new_id: impl FnOnce() -> String,
) -> MarkOutcome {
    match existing {
        Some(mut record) => {
            record.touch(now);
            MarkOutcome {
                record,
                duplicate: true,
            }
        }
        None => MarkOutcome {
            record: AttendanceRecord::open(new_id(), mark, now),
            duplicate: false,
        },
    }
}
