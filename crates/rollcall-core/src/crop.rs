//! Face cropping: turn detector boxes into fixed-size embedder inputs.

use crate::types::{BoundingBox, FaceBox};
use image::imageops::FilterType;
use image::RgbImage;

/// Embedder input edge length.
pub const FACE_INPUT_SIZE: u32 = 112;

/// Frames smaller than this in either dimension are not searched.
pub const MIN_FRAME_EDGE: u32 = 50;

/// Acceptance rules for detector boxes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropPolicy {
    /// Detection confidence must be strictly above this.
    pub min_confidence: f32,
    /// Width and height must be strictly above this, in pixels.
    pub min_size: u32,
}

impl CropPolicy {
    /// Live recognition: lenient, to catch faces further from the camera.
    pub const RECOGNITION: CropPolicy = CropPolicy {
        min_confidence: 0.70,
        min_size: 30,
    };

    /// Enrollment: larger faces only.
    pub const ENROLLMENT: CropPolicy = CropPolicy {
        min_confidence: 0.65,
        min_size: 60,
    };

    pub fn accepts(&self, b: &BoundingBox) -> bool {
        b.confidence > self.min_confidence
            && b.width > self.min_size as f32
            && b.height > self.min_size as f32
    }
}

/// A face cut out of a frame, resized for the embedder.
#[derive(Debug, Clone)]
pub struct FaceCrop {
    pub face_box: FaceBox,
    pub confidence: f32,
    /// `FACE_INPUT_SIZE` x `FACE_INPUT_SIZE` RGB crop.
    pub image: RgbImage,
}

/// Crop every accepted detection out of `frame`.
///
/// The box origin is clamped to the frame and the region is clipped to the
/// frame bounds; boxes that fall entirely outside are dropped.
pub fn crop_faces(frame: &RgbImage, detections: &[BoundingBox], policy: CropPolicy) -> Vec<FaceCrop> {
    let (fw, fh) = frame.dimensions();
    if fw < MIN_FRAME_EDGE || fh < MIN_FRAME_EDGE {
        tracing::warn!(width = fw, height = fh, "frame too small for detection");
        return Vec::new();
    }

    let mut crops = Vec::new();
    for det in detections {
        if !policy.accepts(det) {
            tracing::debug!(
                confidence = det.confidence,
                width = det.width,
                height = det.height,
                "detection rejected by crop policy"
            );
            continue;
        }

        let face_box = FaceBox {
            x: det.x.max(0.0).floor() as u32,
            y: det.y.max(0.0).floor() as u32,
            width: det.width.round() as u32,
            height: det.height.round() as u32,
        };

        let Some(image) = cut(frame, face_box) else {
            tracing::debug!(?face_box, "detection outside frame");
            continue;
        };

        crops.push(FaceCrop {
            face_box,
            confidence: det.confidence,
            image,
        });
    }

    tracing::debug!(detections = detections.len(), accepted = crops.len(), "cropped faces");
    crops
}

/// Clip `b` to the frame and resize the region to the embedder input size.
fn cut(frame: &RgbImage, b: FaceBox) -> Option<RgbImage> {
    let (fw, fh) = frame.dimensions();
    if b.x >= fw || b.y >= fh {
        return None;
    }
    let w = b.width.min(fw - b.x);
    let h = b.height.min(fh - b.y);
    if w == 0 || h == 0 {
        return None;
    }
    let region = image::imageops::crop_imm(frame, b.x, b.y, w, h).to_image();
    Some(prepare_face(&region))
}

/// Resize an arbitrary face region to the embedder input size.
pub fn prepare_face(region: &RgbImage) -> RgbImage {
    image::imageops::resize(region, FACE_INPUT_SIZE, FACE_INPUT_SIZE, FilterType::Lanczos3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn det(x: f32, y: f32, w: f32, h: f32, confidence: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence }
    }

    fn frame() -> RgbImage {
        RgbImage::from_pixel(200, 150, Rgb([10, 20, 30]))
    }

    #[test]
    fn test_recognition_policy_thresholds() {
        let p = CropPolicy::RECOGNITION;
        assert!(p.accepts(&det(0.0, 0.0, 31.0, 31.0, 0.71)));
        assert!(!p.accepts(&det(0.0, 0.0, 31.0, 31.0, 0.70)));
        assert!(!p.accepts(&det(0.0, 0.0, 30.0, 31.0, 0.9)));
    }

    #[test]
    fn test_enrollment_policy_requires_larger_faces() {
        let p = CropPolicy::ENROLLMENT;
        assert!(p.accepts(&det(0.0, 0.0, 61.0, 61.0, 0.66)));
        assert!(!p.accepts(&det(0.0, 0.0, 50.0, 80.0, 0.99)));
    }

    #[test]
    fn test_crops_are_resized() {
        let crops = crop_faces(&frame(), &[det(10.0, 10.0, 60.0, 80.0, 0.9)], CropPolicy::RECOGNITION);
        assert_eq!(crops.len(), 1);
        assert_eq!(crops[0].image.dimensions(), (FACE_INPUT_SIZE, FACE_INPUT_SIZE));
        assert_eq!(crops[0].face_box, FaceBox { x: 10, y: 10, width: 60, height: 80 });
    }

    #[test]
    fn test_negative_origin_is_clamped() {
        let crops = crop_faces(&frame(), &[det(-12.0, -3.5, 50.0, 50.0, 0.9)], CropPolicy::RECOGNITION);
        assert_eq!(crops[0].face_box.x, 0);
        assert_eq!(crops[0].face_box.y, 0);
    }

    #[test]
    fn test_box_overhanging_edge_is_clipped() {
        let crops = crop_faces(&frame(), &[det(180.0, 120.0, 60.0, 60.0, 0.9)], CropPolicy::RECOGNITION);
        assert_eq!(crops.len(), 1);
    }

    #[test]
    fn test_box_outside_frame_is_dropped() {
        let crops = crop_faces(&frame(), &[det(400.0, 10.0, 60.0, 60.0, 0.9)], CropPolicy::RECOGNITION);
        assert!(crops.is_empty());
    }

    #[test]
    fn test_tiny_frame_yields_nothing() {
        let tiny = RgbImage::new(40, 120);
        let crops = crop_faces(&tiny, &[det(0.0, 0.0, 35.0, 35.0, 0.99)], CropPolicy::RECOGNITION);
        assert!(crops.is_empty());
    }
}
