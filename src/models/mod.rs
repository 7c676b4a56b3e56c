//! Vision model handles shared by every scan session.
//!
//! Models are reached through a [`ModelBackend`] and held by an explicitly
//! constructed [`ModelRegistry`]. A model that fails to load stays absent until
//! the next [`ModelRegistry::reload`]; scans are refused while the pose or
//! detection model is absent.

pub mod keypoint;
pub mod mock;
mod registry;
pub mod remote;

pub use keypoint::{Keypoint, KeypointIndex, Pose, Side};
pub use mock::MockModelBackend;
pub use registry::{ModelAvailability, ModelKind, ModelRegistry};
pub use remote::RemoteModelBackend;

use crate::error::{ClassificationError, DetectionError, FrameError};
use crate::frame::{encode_jpeg, Rect};
use async_trait::async_trait;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// JPEG payload handed to a model, with the pixel size it was encoded at
#[derive(Debug, Clone)]
pub struct InferenceImage {
    pub jpeg: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
}

impl InferenceImage {
    /// JPEG-encode an RGB image for submission to a model
    pub fn encode(image: &RgbImage, quality: u8) -> Result<Self, FrameError> {
        let jpeg = encode_jpeg(image, quality)?;
        Ok(Self {
            jpeg: Arc::new(jpeg),
            width: image.width(),
            height: image.height(),
        })
    }
}

/// One box from the object detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDetection {
    pub label: String,
    pub confidence: f32,
    pub bbox: Rect,
}

/// Top-1 output of the item classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierOutput {
    pub label: String,
    pub confidence: f32,
}

#[async_trait]
pub trait PoseEstimator: Send + Sync {
    async fn estimate(&self, image: &InferenceImage) -> Result<Vec<Pose>, DetectionError>;
}

#[async_trait]
pub trait ObjectDetector: Send + Sync {
    async fn detect(&self, image: &InferenceImage)
        -> Result<Vec<ObjectDetection>, DetectionError>;
}

#[async_trait]
pub trait ItemClassifier: Send + Sync {
    async fn classify(&self, image: &InferenceImage)
        -> Result<ClassifierOutput, ClassificationError>;
}

/// Source of model handles
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn load_pose(&self) -> Result<Arc<dyn PoseEstimator>, DetectionError>;

    async fn load_detector(&self) -> Result<Arc<dyn ObjectDetector>, DetectionError>;

    async fn load_classifier(&self) -> Result<Arc<dyn ItemClassifier>, ClassificationError>;

    /// Name used in logs
    fn backend_name(&self) -> &str;
}
