//! Recognition and enrollment flows: intake, detection, cropping, embedding,
//! matching, and optional attendance marking.

use crate::engine::{EngineError, ModelService};
use crate::routes::attendance::RecordView;
use crate::routes::AppState;
use rollcall_core::crop::{crop_faces, CropPolicy};
use rollcall_core::intake::{self, IntakeError};
use rollcall_core::ledger::{AttendanceMark, DEFAULT_PERIOD};
use rollcall_core::matcher::{validate_threshold, InvalidThreshold, StudentMatch};
use rollcall_core::{CosineMatcher, Embedding, FaceBox, MatchOutcome, Matcher};
use rollcall_store::StoreError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

pub const ENROLLMENT_IMAGE_COUNT: usize = 5;

/// Per-face error reported when a crop cannot be embedded.
pub const FACE_DATA_ERROR: &str = "Failed to extract face data";

/// Per-face error reported when a matched face cannot be marked present.
pub const MARK_ERROR: &str = "Failed to mark attendance";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid base64 image")]
    Image(#[source] IntakeError),
    #[error(transparent)]
    Threshold(#[from] InvalidThreshold),
    #[error("face models unavailable: {0}")]
    Engine(#[from] EngineError),
    #[error("Exactly 5 images are required, got {0}")]
    ImageCount(usize),
    #[error("Invalid image data at index {index}")]
    EnrollImage {
        index: usize,
        #[source]
        source: IntakeError,
    },
    #[error("Ensure exactly one face in each image (failed at image {}, found {found})", .index + 1)]
    EnrollFaceCount { index: usize, found: usize },
    #[error("Failed to extract face features for image {}", .index + 1)]
    EnrollEmbed {
        index: usize,
        #[source]
        source: EngineError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognizeRequest {
    pub image: String,
    #[serde(default)]
    pub threshold: Option<f32>,
    /// When present, every matched face is marked present for this session.
    #[serde(default)]
    pub session: Option<SessionRequest>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub session_name: String,
    #[serde(default)]
    pub period: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognizeResponse {
    pub success: bool,
    pub faces: Vec<FaceResult>,
    /// Seconds.
    pub processing_time: f64,
    pub detection_time: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedStudent {
    pub user_id: String,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct FaceTiming {
    pub embed: f64,
    pub search: f64,
}

#[derive(Debug, Serialize)]
pub struct MarkSummary {
    pub duplicate: bool,
    pub record: RecordView,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceResult {
    #[serde(rename = "box")]
    pub face_box: FaceBox,
    #[serde(rename = "match")]
    pub matched: Option<MatchedStudent>,
    pub distance: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_distance: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_ratio: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attendance: Option<MarkSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timing: Option<FaceTiming>,
}

impl FaceResult {
    fn failed(face_box: FaceBox) -> Self {
        Self {
            face_box,
            matched: None,
            distance: None,
            confidence: None,
            mean_distance: None,
            match_count: None,
            match_ratio: None,
            error: Some(FACE_DATA_ERROR),
            attendance: None,
            timing: None,
        }
    }

    fn from_outcome(face_box: FaceBox, outcome: &MatchOutcome, timing: FaceTiming) -> Self {
        let matched = outcome.matched.as_ref();
        Self {
            face_box,
            matched: matched.map(|m| MatchedStudent {
                user_id: m.identity.student_id.clone(),
                name: m.identity.student_name.clone(),
            }),
            distance: outcome.distance().map(|d| round_to(d, 4)),
            confidence: outcome.confidence(),
            mean_distance: matched.map(|m| round_to(m.mean_distance, 4)),
            match_count: matched.map(|m| m.match_count),
            match_ratio: matched.map(|m| round_to(m.match_ratio(), 1)),
            error: None,
            attendance: None,
            timing: Some(timing),
        }
    }
}

fn round_to(v: f32, decimals: i32) -> f32 {
    let f = 10f32.powi(decimals);
    (v * f).round() / f
}

fn secs(d: Duration) -> f64 {
    (d.as_secs_f64() * 1000.0).round() / 1000.0
}

/// Detect, embed and match every face in one image.
pub async fn recognize(state: &AppState, req: RecognizeRequest) -> Result<RecognizeResponse, PipelineError> {
    let started = Instant::now();
    let threshold = validate_threshold(req.threshold.unwrap_or(state.config.match_threshold))?;

    let frame = intake::decode_frame(
        &req.image,
        state.config.max_image_width,
        state.config.max_image_height,
    )
    .map_err(PipelineError::Image)?;
    let frame = Arc::new(frame);

    let detect_started = Instant::now();
    let detections = state.models.detect(Arc::clone(&frame)).await?;
    let detection_time = detect_started.elapsed();
    let crops = crop_faces(&frame, &detections, CropPolicy::RECOGNITION);

    let gallery = if crops.is_empty() {
        Vec::new()
    } else {
        state.store.gallery().await?
    };

    let mut faces = Vec::with_capacity(crops.len());
    for crop in crops {
        let embed_started = Instant::now();
        let embedding = match state.models.embed(crop.image).await {
            Ok(embedding) => embedding,
            Err(EngineError::ChannelClosed) => return Err(EngineError::ChannelClosed.into()),
            Err(err) => {
                tracing::warn!(error = %err, face = ?crop.face_box, "face embedding failed");
                faces.push(FaceResult::failed(crop.face_box));
                continue;
            }
        };
        let embed_time = embed_started.elapsed();

        let search_started = Instant::now();
        let outcome = CosineMatcher.compare(&embedding, &gallery, threshold);
        let timing = FaceTiming {
            embed: secs(embed_time),
            search: secs(search_started.elapsed()),
        };

        let mut result = FaceResult::from_outcome(crop.face_box, &outcome, timing);
        if let (Some(student), Some(session)) = (&outcome.matched, &req.session) {
            match mark_matched(state, student, session).await {
                Ok(summary) => result.attendance = Some(summary),
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        student = %student.identity.student_id,
                        "attendance mark failed"
                    );
                    result.error = Some(MARK_ERROR);
                }
            }
        }
        faces.push(result);
    }

    let matched = faces.iter().filter(|f| f.matched.is_some()).count();
    tracing::info!(
        faces = faces.len(),
        matched,
        threshold,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "recognition complete"
    );

    Ok(RecognizeResponse {
        success: true,
        faces,
        processing_time: secs(started.elapsed()),
        detection_time: secs(detection_time),
    })
}

async fn mark_matched(
    state: &AppState,
    student: &StudentMatch,
    session: &SessionRequest,
) -> Result<MarkSummary, StoreError> {
    let mark = AttendanceMark::new(&student.identity.student_id, &student.identity.student_name)
        .session(&session.session_name)
        .period(session.period.as_deref().unwrap_or(DEFAULT_PERIOD));
    let outcome = state.store.mark_attendance(&mark, state.clock.now()).await?;
    Ok(MarkSummary {
        duplicate: outcome.duplicate,
        record: outcome.record.into(),
    })
}

/// Embed exactly five enrollment images, each holding exactly one face.
/// The first failing image aborts the enrollment.
pub async fn enroll(models: &ModelService, images: &[String]) -> Result<Vec<Embedding>, PipelineError> {
    if images.len() != ENROLLMENT_IMAGE_COUNT {
        return Err(PipelineError::ImageCount(images.len()));
    }

    let mut embeddings = Vec::with_capacity(ENROLLMENT_IMAGE_COUNT);
    for (index, payload) in images.iter().enumerate() {
        let frame = intake::decode_image(payload)
            .map_err(|source| PipelineError::EnrollImage { index, source })?;
        let frame = Arc::new(frame);

        let detections = models.detect(Arc::clone(&frame)).await?;
        let crops = crop_faces(&frame, &detections, CropPolicy::ENROLLMENT);
        let found = crops.len();
        let Ok([crop]) = <[_; 1]>::try_from(crops) else {
            return Err(PipelineError::EnrollFaceCount { index, found });
        };

        let embedding = models.embed(crop.image).await.map_err(|source| match source {
            EngineError::ChannelClosed => PipelineError::Engine(source),
            _ => PipelineError::EnrollEmbed { index, source },
        })?;
        tracing::debug!(index, confidence = crop.confidence, "enrollment image embedded");
        embeddings.push(embedding);
    }
    Ok(embeddings)
}
