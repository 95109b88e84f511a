//! Class timetables and session labeling.

use chrono::{Datelike, NaiveDateTime, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};

/// Bell schedule: period number and [start, end) in minutes from midnight.
pub const BELL_SCHEDULE: [(u8, u32, u32); 7] = [
    (1, 540, 590),
    (2, 600, 650),
    (3, 660, 710),
    (4, 720, 770),
    // lunch 13:00-14:00
    (5, 840, 890),
    (6, 900, 950),
    (7, 960, 1010),
];

/// Period number in progress at `time`, if any.
pub fn period_at(time: NaiveTime) -> Option<u8> {
    let minutes = time.hour() * 60 + time.minute();
    BELL_SCHEDULE
        .iter()
        .find(|(_, start, end)| (*start..*end).contains(&minutes))
        .map(|(n, _, _)| *n)
}

pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// (department, year, division) identifying one class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClassKey {
    pub department: String,
    pub year: String,
    pub division: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Period {
    pub period_number: u8,
    pub subject: String,
    pub teacher: String,
    #[serde(with = "hh_mm")]
    pub start_time: NaiveTime,
    #[serde(with = "hh_mm")]
    pub end_time: NaiveTime,
    /// Weekday names, e.g. "Monday".
    pub days: Vec<String>,
}

impl Period {
    pub fn runs_on(&self, day: Weekday) -> bool {
        let name = weekday_name(day);
        self.days.iter().any(|d| d.trim().eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timetable {
    #[serde(flatten)]
    pub class: ClassKey,
    pub periods: Vec<Period>,
}

impl Timetable {
    /// Reject periods whose time range is empty or inverted.
    pub fn validate(&self) -> Result<(), String> {
        for p in &self.periods {
            if p.end_time <= p.start_time {
                return Err(format!(
                    "period {} ({}) ends before it starts",
                    p.period_number, p.subject
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    ActiveClass,
    FreePeriod,
    NoTimetable,
    OutsideHours,
}

/// What a student should be attending at a given moment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionLabel {
    pub subject: String,
    pub teacher: Option<String>,
    pub period: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day: Option<String>,
    pub status: SessionStatus,
}

/// Label the session in progress at `now` for a class with `timetable`.
pub fn resolve_session(timetable: Option<&Timetable>, now: NaiveDateTime) -> SessionLabel {
    let Some(period) = period_at(now.time()) else {
        return SessionLabel {
            subject: "After Hours".into(),
            teacher: None,
            period: "N/A".into(),
            day: None,
            status: SessionStatus::OutsideHours,
        };
    };

    let weekday = now.weekday();
    let day = weekday_name(weekday).to_string();

    let Some(timetable) = timetable else {
        return SessionLabel {
            subject: "General Attendance".into(),
            teacher: None,
            period: period.to_string(),
            day: None,
            status: SessionStatus::NoTimetable,
        };
    };

    match timetable
        .periods
        .iter()
        .find(|p| p.period_number == period && p.runs_on(weekday))
    {
        Some(p) => SessionLabel {
            subject: p.subject.clone(),
            teacher: Some(p.teacher.clone()),
            period: period.to_string(),
            day: Some(day),
            status: SessionStatus::ActiveClass,
        },
        None => SessionLabel {
            subject: "Free Period".into(),
            teacher: None,
            period: period.to_string(),
            day: Some(day),
            status: SessionStatus::FreePeriod,
        },
    }
}

mod hh_mm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(raw.trim(), "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(raw.trim(), "%H:%M:%S"))
            .map_err(serde::de::Error::custom)
    }
}
