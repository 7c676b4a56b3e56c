use crate::error::FrameError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Axis-aligned rectangle in pixel coordinates (min inclusive, max exclusive)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl Rect {
    pub fn new(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    /// Square of half-size `half` centered on (`cx`, `cy`)
    pub fn centered(cx: f32, cy: f32, half: f32) -> Self {
        Self::new(cx - half, cy - half, cx + half, cy + half)
    }

    pub fn width(&self) -> f32 {
        (self.x_max - self.x_min).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y_max - self.y_min).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn is_finite(&self) -> bool {
        self.x_min.is_finite()
            && self.y_min.is_finite()
            && self.x_max.is_finite()
            && self.y_max.is_finite()
    }

    pub fn intersection(&self, other: &Rect) -> Rect {
        Rect::new(
            self.x_min.max(other.x_min),
            self.y_min.max(other.y_min),
            self.x_max.min(other.x_max),
            self.y_max.min(other.y_max),
        )
    }

    /// Intersection over union; 0.0 for disjoint or degenerate boxes
    pub fn iou(&self, other: &Rect) -> f32 {
        let inter = self.intersection(other).area();
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Clamp to `[0, width] x [0, height]`
    pub fn clamp_to(&self, width: u32, height: u32) -> Rect {
        let w = width as f32;
        let h = height as f32;
        Rect::new(
            self.x_min.clamp(0.0, w),
            self.y_min.clamp(0.0, h),
            self.x_max.clamp(0.0, w),
            self.y_max.clamp(0.0, h),
        )
    }

    /// Grow each side by `fraction` of the width/height
    pub fn padded(&self, fraction: f32) -> Rect {
        let dx = self.width() * fraction;
        let dy = self.height() * fraction;
        Rect::new(
            self.x_min - dx,
            self.y_min - dy,
            self.x_max + dx,
            self.y_max + dy,
        )
    }
}

/// Decoded camera frame, normalized to RGB8
#[derive(Debug, Clone)]
pub struct Frame {
    /// Pixel data (shared ownership so the frame can be handed to blocking tasks)
    pub image: Arc<RgbImage>,
    /// When the frame entered the pipeline
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image: Arc::new(image),
            captured_at: Utc::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Decode a base64 payload (optionally a `data:` URL) into a normalized frame
    pub fn from_base64(payload: &str, max_dimension: u32) -> Result<Self, FrameError> {
        let bytes = decode_base64_payload(payload)?;
        Self::from_encoded(&bytes, max_dimension)
    }

    /// Decode an encoded image (JPEG/PNG) into a normalized frame
    pub fn from_encoded(bytes: &[u8], max_dimension: u32) -> Result<Self, FrameError> {
        let decoded =
            image::load_from_memory(bytes).map_err(|e| FrameError::DecodeFailed {
                details: e.to_string(),
            })?;

        if decoded.width() == 0 || decoded.height() == 0 {
            return Err(FrameError::Empty {
                width: decoded.width(),
                height: decoded.height(),
            });
        }

        let longest = decoded.width().max(decoded.height());
        let normalized = if longest > max_dimension {
            debug!(
                "Downscaling {}x{} frame to longest side {}",
                decoded.width(),
                decoded.height(),
                max_dimension
            );
            decoded.resize(max_dimension, max_dimension, FilterType::Triangle)
        } else {
            decoded
        };

        Ok(Self::new(normalized.to_rgb8()))
    }

    /// Encode the whole frame as JPEG
    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>, FrameError> {
        encode_jpeg(&self.image, quality)
    }
}

/// Encode an RGB image as JPEG
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, FrameError> {
    let mut buffer = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
    encoder
        .encode_image(image)
        .map_err(|e| FrameError::EncodeFailed {
            details: e.to_string(),
        })?;
    Ok(buffer)
}

/// Strip an optional `data:*;base64,` prefix and decode
pub fn decode_base64_payload(payload: &str) -> Result<Vec<u8>, FrameError> {
    let trimmed = payload.trim();
    let body = match trimmed.split_once(',') {
        Some((_, body)) => body,
        None => trimmed,
    };

    if body.is_empty() {
        return Err(FrameError::InvalidEncoding {
            details: "empty payload".to_string(),
        });
    }

    BASE64
        .decode(body)
        .map_err(|e| FrameError::InvalidEncoding {
            details: e.to_string(),
        })
}

/// Render JPEG bytes as a `data:image/jpeg;base64,` URL
pub fn jpeg_data_url(jpeg: &[u8]) -> String {
    format!("data:image/jpeg;base64,{}", BASE64.encode(jpeg))
}

#[cfg(test)]
pub(crate) fn test_jpeg(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, image::Rgb([120, 80, 40]));
    encode_jpeg(&image, 90).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_iou() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(5.0, 0.0, 15.0, 10.0);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);

        let disjoint = Rect::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(a.iou(&disjoint), 0.0);
        assert_eq!(a.iou(&a), 1.0);
    }

    #[test]
    fn test_rect_padding_and_clamp() {
        let rect = Rect::new(10.0, 10.0, 110.0, 60.0).padded(0.1);
        assert_eq!(rect, Rect::new(0.0, 5.0, 120.0, 65.0));

        let clamped = Rect::new(-5.0, -5.0, 700.0, 500.0).clamp_to(640, 480);
        assert_eq!(clamped, Rect::new(0.0, 0.0, 640.0, 480.0));
    }

    #[test]
    fn test_decode_data_url_frame() {
        let jpeg = test_jpeg(64, 48);
        let url = jpeg_data_url(&jpeg);

        let frame = Frame::from_base64(&url, 1280).unwrap();
        assert_eq!((frame.width(), frame.height()), (64, 48));

        let plain = BASE64.encode(&jpeg);
        let frame = Frame::from_base64(&plain, 1280).unwrap();
        assert_eq!((frame.width(), frame.height()), (64, 48));
    }

    #[test]
    fn test_large_frame_is_downscaled() {
        let jpeg = test_jpeg(400, 200);
        let frame = Frame::from_encoded(&jpeg, 100).unwrap();
        assert_eq!(frame.width(), 100);
        assert_eq!(frame.height(), 50);
    }

    #[test]
    fn test_invalid_payloads_are_rejected() {
        assert!(matches!(
            Frame::from_base64("", 1280),
            Err(FrameError::InvalidEncoding { .. })
        ));
        assert!(matches!(
            Frame::from_base64("!!not-base64!!", 1280),
            Err(FrameError::InvalidEncoding { .. })
        ));
        let not_an_image = BASE64.encode(b"hello world");
        assert!(matches!(
            Frame::from_base64(&not_an_image, 1280),
            Err(FrameError::DecodeFailed { .. })
        ));
    }
}
