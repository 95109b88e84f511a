//! rollcall-core: face intake, detection and embedding, matching, and the
//! attendance rules they feed.
//!
//! Detection (SCRFD) and embedding (ArcFace) run on ONNX Runtime behind the
//! [`FaceDetector`] and [`FaceEmbedder`] traits.

pub mod clock;
pub mod crop;
pub mod detector;
pub mod embedder;
pub mod intake;
pub mod ledger;
pub mod matcher;
pub mod timetable;
pub mod types;

pub use clock::{Clock, SystemClock};
pub use detector::{FaceDetector, ScrfdDetector};
pub use embedder::{ArcFaceEmbedder, FaceEmbedder};
pub use matcher::{CosineMatcher, MatchOutcome, Matcher};
pub use types::{BoundingBox, Embedding, FaceBox, GalleryEntry, Role, StudentIdentity};

use std::path::PathBuf;

/// Default data directory: `$XDG_DATA_HOME/rollcall`.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

/// Default model directory: `$XDG_DATA_HOME/rollcall/models`.
pub fn default_model_dir() -> PathBuf {
    default_data_dir().join("models")
}

/// Default database path, shared by the daemon and the CLI.
pub fn default_db_path() -> PathBuf {
    default_data_dir().join("rollcall.db")
}
