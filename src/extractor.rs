use crate::config::ExtractorConfig;
use crate::error::RegionError;
use crate::frame::{jpeg_data_url, Frame, Rect};
use crate::models::InferenceImage;
use image::imageops;
use tracing::debug;

/// Object sub-image ready for classification
#[derive(Debug, Clone)]
pub struct CroppedRegion {
    pub image: InferenceImage,
    /// Padded and clamped region actually cropped, in frame pixels
    pub region: Rect,
}

impl CroppedRegion {
    /// Crop as a `data:image/jpeg;base64,` URL
    pub fn data_url(&self) -> String {
        jpeg_data_url(&self.image.jpeg)
    }
}

/// Crops and re-encodes object regions
#[derive(Debug, Clone)]
pub struct RegionExtractor {
    config: ExtractorConfig,
}

impl RegionExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    /// Pad `region`, clamp it to the frame and crop
    pub fn extract(&self, frame: &Frame, region: &Rect) -> Result<CroppedRegion, RegionError> {
        let padded = self.padded_region(frame, region)?;

        let x = padded.x_min.floor() as u32;
        let y = padded.y_min.floor() as u32;
        let width = (padded.x_max.ceil() as u32).min(frame.width()) - x;
        let height = (padded.y_max.ceil() as u32).min(frame.height()) - y;

        let crop = imageops::crop_imm(frame.image.as_ref(), x, y, width, height).to_image();
        let image = InferenceImage::encode(&crop, self.config.jpeg_quality)?;

        debug!(
            "Cropped {}x{} region at ({}, {}) into {} bytes",
            width,
            height,
            x,
            y,
            image.jpeg.len()
        );

        Ok(CroppedRegion {
            image,
            region: padded,
        })
    }

    /// Region that [`extract`](Self::extract) would crop, without cropping
    pub fn padded_region(&self, frame: &Frame, region: &Rect) -> Result<Rect, RegionError> {
        if !region.is_finite() {
            return Err(RegionError::InvalidRegion {
                details: format!("non-finite region {:?}", region),
            });
        }
        if region.area() <= 0.0 {
            return Err(RegionError::InvalidRegion {
                details: format!("zero-area region {:?}", region),
            });
        }

        let clamped = region
            .padded(self.config.margin_fraction)
            .clamp_to(frame.width(), frame.height());

        // Anything under a pixel after clamping lies outside the frame
        if clamped.width() < 1.0 || clamped.height() < 1.0 {
            return Err(RegionError::InvalidRegion {
                details: format!(
                    "region {:?} lies outside the {}x{} frame",
                    region,
                    frame.width(),
                    frame.height()
                ),
            });
        }

        Ok(clamped)
    }
}
