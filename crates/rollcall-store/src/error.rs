use thiserror::Error;

pub type Result<T> = core::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("student id already exists: {0}")]
    DuplicateStudentId(String),
    #[error("email already registered: {0}")]
    DuplicateEmail(String),
    #[error("invalid timetable: {0}")]
    InvalidTimetable(String),
}
