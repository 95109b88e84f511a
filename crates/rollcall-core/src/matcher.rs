//! Nearest-student search over stored face embeddings.

use crate::types::{Embedding, GalleryEntry, StudentIdentity};
use serde_json::Value;
use thiserror::Error;

/// Largest meaningful cosine distance.
pub const MAX_COSINE_DISTANCE: f32 = 2.0;

/// Why a stored embedding was not compared.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CorruptEmbedding {
    #[error("stored entry is {0}, not an array")]
    NotAnArray(&'static str),
    #[error("stored entry is empty")]
    Empty,
    #[error("element {0} is not a number")]
    NotANumber(usize),
    #[error("element {0} is not finite")]
    NonFinite(usize),
    #[error("vector has zero norm")]
    ZeroNorm,
    #[error("dimension {stored} does not match probe dimension {probe}")]
    DimensionMismatch { stored: usize, probe: usize },
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("threshold must be a finite distance in (0, 2], got {0}")]
pub struct InvalidThreshold(pub f32);

/// Check a caller-supplied distance threshold.
pub fn validate_threshold(threshold: f32) -> Result<f32, InvalidThreshold> {
    if threshold.is_finite() && threshold > 0.0 && threshold <= MAX_COSINE_DISTANCE {
        Ok(threshold)
    } else {
        Err(InvalidThreshold(threshold))
    }
}

/// Parse one stored `face_data` entry into an embedding.
pub fn parse_stored_embedding(value: &Value) -> Result<Embedding, CorruptEmbedding> {
    let items = match value {
        Value::Array(items) => items,
        Value::String(_) => return Err(CorruptEmbedding::NotAnArray("a string")),
        Value::Null => return Err(CorruptEmbedding::NotAnArray("null")),
        Value::Bool(_) => return Err(CorruptEmbedding::NotAnArray("a boolean")),
        Value::Number(_) => return Err(CorruptEmbedding::NotAnArray("a number")),
        Value::Object(_) => return Err(CorruptEmbedding::NotAnArray("an object")),
    };
    if items.is_empty() {
        return Err(CorruptEmbedding::Empty);
    }

    let mut values = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let v = item.as_f64().ok_or(CorruptEmbedding::NotANumber(i))? as f32;
        if !v.is_finite() {
            return Err(CorruptEmbedding::NonFinite(i));
        }
        values.push(v);
    }

    if values.iter().all(|v| *v == 0.0) {
        return Err(CorruptEmbedding::ZeroNorm);
    }
    Ok(Embedding::new(values))
}

/// Derived confidence for a matched distance, as a percentage in [0, 100]
/// rounded to one decimal.
pub fn confidence_from_distance(distance: f32) -> f32 {
    let pct = ((1.0 - distance) * 100.0).clamp(0.0, 100.0);
    (pct * 10.0).round() / 10.0
}

/// Per-student summary of the best accepted candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct StudentMatch {
    pub identity: StudentIdentity,
    /// Minimum distance over this student's valid embeddings.
    pub distance: f32,
    pub mean_distance: f32,
    /// Number of embeddings strictly within the threshold.
    pub match_count: usize,
    /// Number of valid embeddings compared.
    pub compared: usize,
}

impl StudentMatch {
    /// Share of compared embeddings within threshold, as a percentage.
    pub fn match_ratio(&self) -> f32 {
        if self.compared == 0 {
            0.0
        } else {
            self.match_count as f32 / self.compared as f32 * 100.0
        }
    }
}

/// Result of matching a probe embedding against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub matched: Option<StudentMatch>,
    /// Lowest distance observed across every valid stored embedding.
    /// `None` when nothing was compared.
    pub best_distance: Option<f32>,
}

impl MatchOutcome {
    pub fn no_match(best_distance: Option<f32>) -> Self {
        Self {
            matched: None,
            best_distance,
        }
    }

    pub fn is_match(&self) -> bool {
        self.matched.is_some()
    }

    /// Distance to report: the matched student's, else the best observed.
    pub fn distance(&self) -> Option<f32> {
        self.matched.as_ref().map(|m| m.distance).or(self.best_distance)
    }

    pub fn confidence(&self) -> Option<f32> {
        self.matched
            .as_ref()
            .map(|m| confidence_from_distance(m.distance))
    }
}

/// Strategy for comparing a probe embedding against a gallery of students.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[GalleryEntry], threshold: f32) -> MatchOutcome;
}

/// Exhaustive cosine-distance matcher.
///
/// Every valid embedding of every student is compared. A student replaces the
/// current best only with a strictly lower minimum distance and at least one
/// embedding inside the threshold, so ties keep the earlier student.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[GalleryEntry], threshold: f32) -> MatchOutcome {
        if gallery.is_empty() {
            tracing::debug!("gallery empty; no match");
            return MatchOutcome::no_match(None);
        }
        if probe.values.iter().all(|v| *v == 0.0) {
            tracing::warn!(dimension = probe.len(), "probe embedding is empty or zero; no match");
            return MatchOutcome::no_match(None);
        }

        let mut best: Option<StudentMatch> = None;
        let mut best_observed: Option<f32> = None;

        for entry in gallery {
            let name = &entry.identity.student_name;
            if entry.face_data.is_empty() {
                continue;
            }

            let mut distances = Vec::with_capacity(entry.face_data.len());
            for (idx, stored) in entry.face_data.iter().enumerate() {
                let distance = parse_stored_embedding(stored).and_then(|emb| {
                    probe
                        .cosine_distance(&emb)
                        .ok_or(CorruptEmbedding::DimensionMismatch {
                            stored: emb.len(),
                            probe: probe.len(),
                        })
                });
                match distance {
                    Ok(d) => distances.push(d),
                    Err(err) => {
                        tracing::warn!(student = %name, entry = idx, error = %err, "skipping corrupt face data");
                    }
                }
            }

            if distances.is_empty() {
                tracing::warn!(student = %name, "all face data corrupt; skipping student");
                continue;
            }

            let min = distances.iter().copied().fold(f32::INFINITY, f32::min);
            let mean = distances.iter().sum::<f32>() / distances.len() as f32;
            let match_count = distances.iter().filter(|d| **d < threshold).count();

            tracing::debug!(
                student = %name,
                min_distance = min,
                matches = match_count,
                compared = distances.len(),
                "compared student"
            );

            if best_observed.map_or(true, |b| min < b) {
                best_observed = Some(min);
            }

            let beats_best = best.as_ref().map_or(true, |b| min < b.distance);
            if beats_best && match_count >= 1 {
                best = Some(StudentMatch {
                    identity: entry.identity.clone(),
                    distance: min,
                    mean_distance: mean,
                    match_count,
                    compared: distances.len(),
                });
            }
        }

        match best {
            Some(m) if m.distance < threshold => {
                tracing::info!(
                    student = %m.identity.student_name,
                    distance = m.distance,
                    matches = m.match_count,
                    "matched"
                );
                MatchOutcome {
                    matched: Some(m),
                    best_distance: best_observed,
                }
            }
            _ => {
                tracing::info!(best_distance = ?best_observed, threshold, "no match");
                MatchOutcome::no_match(best_observed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(id: &str, face_data: Vec<Value>) -> GalleryEntry {
        GalleryEntry {
            identity: StudentIdentity {
                student_id: id.into(),
                student_name: format!("name-{id}"),
            },
            face_data,
        }
    }

    /// Unit vector in the plane at cosine distance `d` from [1, 0].
    fn at_distance(d: f32) -> Value {
        let cos = 1.0 - d;
        let sin = (1.0 - cos * cos).max(0.0).sqrt();
        json!([cos, sin])
    }

    fn probe() -> Embedding {
        Embedding::new(vec![1.0, 0.0])
    }

    #[test]
    fn test_closer_student_wins_under_threshold() {
        let gallery = vec![entry("B", vec![at_distance(0.6)]), entry("A", vec![at_distance(0.3)])];
        let out = CosineMatcher.compare(&probe(), &gallery, 0.55);
        let m = out.matched.expect("A should match");
        assert_eq!(m.identity.student_id, "A");
        assert!((m.distance - 0.3).abs() < 1e-4);
    }

    #[test]
    fn test_no_match_reports_best_observed_distance() {
        let gallery = vec![entry("A", vec![at_distance(0.7)]), entry("B", vec![at_distance(0.6)])];
        let out = CosineMatcher.compare(&probe(), &gallery, 0.55);
        assert!(!out.is_match());
        assert!((out.best_distance.unwrap() - 0.6).abs() < 1e-4);
        assert_eq!(out.confidence(), None);
    }

    #[test]
    fn test_empty_gallery_is_no_match_without_distance() {
        let out = CosineMatcher.compare(&probe(), &[], 0.55);
        assert_eq!(out, MatchOutcome::no_match(None));
    }

    #[test]
    fn test_zero_probe_is_no_match_without_distance() {
        let gallery = vec![entry("A", vec![at_distance(0.1)])];
        let zero = Embedding::new(vec![0.0, 0.0]);
        assert_eq!(CosineMatcher.compare(&zero, &gallery, 0.55), MatchOutcome::no_match(None));
        let empty = Embedding::new(Vec::new());
        assert_eq!(CosineMatcher.compare(&empty, &gallery, 0.55), MatchOutcome::no_match(None));
    }

    #[test]
    fn test_corrupt_entry_skipped_valid_entry_matches() {
        let gallery = vec![entry("A", vec![json!("corrupt"), at_distance(0.1)])];
        let out = CosineMatcher.compare(&probe(), &gallery, 0.55);
        let m = out.matched.unwrap();
        assert_eq!(m.identity.student_id, "A");
        assert_eq!(m.compared, 1);
    }

    #[test]
    fn test_student_with_only_corrupt_entries_never_matches() {
        let gallery = vec![entry(
            "A",
            vec![json!("x"), json!([]), json!([1.0, "y"]), json!(null), json!([0.0, 0.0])],
        )];
        let out = CosineMatcher.compare(&probe(), &gallery, 2.0);
        assert_eq!(out, MatchOutcome::no_match(None));
    }

    #[test]
    fn test_dimension_mismatch_is_skipped() {
        let gallery = vec![entry("A", vec![json!([1.0, 0.0, 0.0])])];
        let out = CosineMatcher.compare(&probe(), &gallery, 2.0);
        assert!(!out.is_match());
        assert_eq!(out.best_distance, None);
    }

    #[test]
    fn test_tie_keeps_first_student() {
        let gallery = vec![entry("first", vec![at_distance(0.2)]), entry("second", vec![at_distance(0.2)])];
        let out = CosineMatcher.compare(&probe(), &gallery, 0.55);
        assert_eq!(out.matched.unwrap().identity.student_id, "first");
    }

    #[test]
    fn test_threshold_is_strict() {
        let gallery = vec![entry("A", vec![json!([1.0, 0.0])])];
        // Orthogonal vectors: distance exactly 1.0.
        let out = CosineMatcher.compare(&Embedding::new(vec![0.0, 1.0]), &gallery, 1.0);
        assert!(!out.is_match());
        assert!((out.best_distance.unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_match_count_and_ratio() {
        let gallery = vec![entry(
            "A",
            vec![at_distance(0.1), at_distance(0.2), at_distance(0.8), at_distance(0.9)],
        )];
        let m = CosineMatcher.compare(&probe(), &gallery, 0.5).matched.unwrap();
        assert_eq!(m.match_count, 2);
        assert_eq!(m.compared, 4);
        assert!((m.match_ratio() - 50.0).abs() < 1e-4);
        assert!((m.mean_distance - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_acceptance_is_monotonic_in_threshold() {
        let gallery = vec![
            entry("A", vec![at_distance(0.45), json!("bad")]),
            entry("B", vec![at_distance(0.25), at_distance(0.7)]),
            entry("C", vec![at_distance(0.35)]),
            entry("D", vec![at_distance(1.2)]),
        ];
        let thresholds = [0.1, 0.2, 0.26, 0.3, 0.4, 0.5, 0.9, 1.5, 2.0];
        for (i, t1) in thresholds.iter().enumerate() {
            let lo = CosineMatcher.compare(&probe(), &gallery, *t1);
            for t2 in &thresholds[i + 1..] {
                let hi = CosineMatcher.compare(&probe(), &gallery, *t2);
                if let Some(m) = &lo.matched {
                    assert_eq!(
                        hi.matched.as_ref().map(|h| &h.identity),
                        Some(&m.identity),
                        "match at {t1} lost at {t2}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_confidence_from_distance() {
        assert_eq!(confidence_from_distance(0.3), 70.0);
        assert_eq!(confidence_from_distance(0.0), 100.0);
        assert_eq!(confidence_from_distance(1.4), 0.0);
        assert_eq!(confidence_from_distance(0.1234), 87.7);
    }

    #[test]
    fn test_validate_threshold() {
        assert!(validate_threshold(0.55).is_ok());
        assert!(validate_threshold(2.0).is_ok());
        assert!(validate_threshold(0.0).is_err());
        assert!(validate_threshold(-0.1).is_err());
        assert!(validate_threshold(2.5).is_err());
        assert!(validate_threshold(f32::NAN).is_err());
    }

    #[test]
    fn test_parse_stored_embedding() {
        assert_eq!(
            parse_stored_embedding(&json!("abc")),
            Err(CorruptEmbedding::NotAnArray("a string"))
        );
        assert_eq!(parse_stored_embedding(&json!([])), Err(CorruptEmbedding::Empty));
        assert_eq!(
            parse_stored_embedding(&json!([0.5, true])),
            Err(CorruptEmbedding::NotANumber(1))
        );
        assert_eq!(
            parse_stored_embedding(&json!([1e300])),
            Err(CorruptEmbedding::NonFinite(0))
        );
        assert_eq!(
            parse_stored_embedding(&json!([0.6, 0.8])).unwrap().values,
            vec![0.6, 0.8]
        );
    }
}
