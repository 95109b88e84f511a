//! Image intake: base64 payloads to bounded RGB images.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::imageops::FilterType;
use image::RgbImage;
use thiserror::Error;

/// Recognition frames are downscaled to fit within this size.
pub const MAX_FRAME_WIDTH: u32 = 640;
pub const MAX_FRAME_HEIGHT: u32 = 480;

#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("image payload is empty")]
    Empty,
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("undecodable image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Strip a `data:<mime>;base64,` prefix if present.
pub fn strip_data_url(payload: &str) -> &str {
    let payload = payload.trim();
    if payload.starts_with("data:") {
        payload.split_once(',').map(|(_, rest)| rest).unwrap_or("")
    } else {
        payload
    }
}

/// Decode a base64 image payload to RGB at its native size.
pub fn decode_image(payload: &str) -> Result<RgbImage, IntakeError> {
    let b64 = strip_data_url(payload);
    if b64.is_empty() {
        return Err(IntakeError::Empty);
    }
    // Tolerate line-wrapped payloads.
    let compact: String = b64.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD.decode(compact.as_bytes())?;
    Ok(image::load_from_memory(&bytes)?.to_rgb8())
}

/// Decode a base64 image and downscale it to fit within `max_width` x
/// `max_height`, preserving aspect ratio. Smaller images are left as is.
pub fn decode_frame(payload: &str, max_width: u32, max_height: u32) -> Result<RgbImage, IntakeError> {
    let rgb = decode_image(payload)?;
    Ok(downscale(rgb, max_width, max_height))
}

pub fn downscale(rgb: RgbImage, max_width: u32, max_height: u32) -> RgbImage {
    let (w, h) = rgb.dimensions();
    if w <= max_width && h <= max_height {
        return rgb;
    }
    let scale = (max_width as f32 / w as f32).min(max_height as f32 / h as f32);
    let new_w = ((w as f32 * scale).round() as u32).max(1);
    let new_h = ((h as f32 * scale).round() as u32).max(1);
    tracing::debug!(from = ?(w, h), to = ?(new_w, new_h), "downscaling frame");
    image::imageops::resize(&rgb, new_w, new_h, FilterType::Lanczos3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};
    use std::io::Cursor;

    fn png_base64(width: u32, height: u32) -> String {
        let img = RgbImage::from_pixel(width, height, Rgb([90, 120, 200]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        STANDARD.encode(buf.into_inner())
    }

    #[test]
    fn test_strip_data_url() {
        assert_eq!(strip_data_url("data:image/png;base64,QUJD"), "QUJD");
        assert_eq!(strip_data_url("QUJD"), "QUJD");
        assert_eq!(strip_data_url("data:image/png;base64"), "");
    }

    #[test]
    fn test_decode_small_image_keeps_size() {
        let frame = decode_frame(&png_base64(320, 240), MAX_FRAME_WIDTH, MAX_FRAME_HEIGHT).unwrap();
        assert_eq!(frame.dimensions(), (320, 240));
    }

    #[test]
    fn test_decode_large_image_is_bounded() {
        let payload = format!("data:image/png;base64,{}", png_base64(1280, 720));
        let frame = decode_frame(&payload, MAX_FRAME_WIDTH, MAX_FRAME_HEIGHT).unwrap();
        assert_eq!(frame.dimensions(), (640, 360));
    }

    #[test]
    fn test_decode_tall_image_is_bounded_by_height() {
        let frame = decode_frame(&png_base64(600, 960), MAX_FRAME_WIDTH, MAX_FRAME_HEIGHT).unwrap();
        assert_eq!(frame.dimensions(), (300, 480));
    }

    #[test]
    fn test_rejects_bad_base64() {
        assert!(matches!(decode_image("!!!not base64!!!"), Err(IntakeError::Base64(_))));
    }

    #[test]
    fn test_rejects_non_image_bytes() {
        let payload = STANDARD.encode(b"definitely not an image");
        assert!(matches!(decode_image(&payload), Err(IntakeError::Decode(_))));
    }

    #[test]
    fn test_rejects_empty_payload() {
        assert!(matches!(decode_image("  "), Err(IntakeError::Empty)));
    }
}
