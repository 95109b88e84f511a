use anyhow::Context;
use rollcall_core::intake::{MAX_FRAME_HEIGHT, MAX_FRAME_WIDTH};
use rollcall_core::matcher::validate_threshold;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Daemon configuration.
///
/// Built from defaults, then an optional TOML file named by `ROLLCALL_CONFIG`,
/// then `ROLLCALL_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP listen address (default: 0.0.0.0:5000).
    pub bind_addr: SocketAddr,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Cosine distance below which a stored embedding counts as a match.
    pub match_threshold: f32,
    /// Recognition frames are downscaled to fit within these bounds.
    pub max_image_width: u32,
    pub max_image_height: u32,
    /// Request body limit. Enrollment carries five base64 images.
    pub max_body_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            model_dir: rollcall_core::default_model_dir(),
            db_path: rollcall_core::default_db_path(),
            match_threshold: 0.55,
            max_image_width: MAX_FRAME_WIDTH,
            max_image_height: MAX_FRAME_HEIGHT,
            max_body_bytes: 32 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Load configuration from the optional config file and the environment.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match std::env::var("ROLLCALL_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Self =
            toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))?;
        tracing::info!(path = %path.display(), "config file loaded");
        Ok(config)
    }

    /// Apply `ROLLCALL_*` overrides. Unparsable values are ignored with a
    /// warning.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = env_parse(&lookup, "ROLLCALL_BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Some(dir) = lookup("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        if let Some(t) = env_parse(&lookup, "ROLLCALL_MATCH_THRESHOLD") {
            self.match_threshold = t;
        }
        if let Some(w) = env_parse(&lookup, "ROLLCALL_MAX_IMAGE_WIDTH") {
            self.max_image_width = w;
        }
        if let Some(h) = env_parse(&lookup, "ROLLCALL_MAX_IMAGE_HEIGHT") {
            self.max_image_height = h;
        }
        if let Some(n) = env_parse(&lookup, "ROLLCALL_MAX_BODY_BYTES") {
            self.max_body_bytes = n;
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        validate_threshold(self.match_threshold).context("invalid match_threshold")?;
        anyhow::ensure!(
            self.max_image_width > 0 && self.max_image_height > 0,
            "max image size must be non-zero"
        );
        Ok(())
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn env_parse<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}
