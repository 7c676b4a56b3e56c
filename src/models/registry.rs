use super::{ItemClassifier, ModelBackend, ObjectDetector, PoseEstimator};
use crate::error::DetectionError;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ModelKind {
    Pose,
    Detection,
    Classification,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelKind::Pose => "pose",
            ModelKind::Detection => "detection",
            ModelKind::Classification => "classification",
        };
        f.write_str(name)
    }
}

/// Snapshot of which models are loaded
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ModelAvailability {
    pub pose: bool,
    pub detection: bool,
    pub classification: bool,
    /// Last load error per model
    pub errors: BTreeMap<String, String>,
}

impl ModelAvailability {
    /// Presence detection needs both the pose and detection models
    pub fn scans_ready(&self) -> bool {
        self.pose && self.detection
    }
}

#[derive(Default)]
struct LoadedModels {
    pose: Option<Arc<dyn PoseEstimator>>,
    detector: Option<Arc<dyn ObjectDetector>>,
    classifier: Option<Arc<dyn ItemClassifier>>,
    errors: BTreeMap<String, String>,
}

/// Shared, read-only model handles with a bounded inference pool
pub struct ModelRegistry {
    backend: Arc<dyn ModelBackend>,
    loaded: RwLock<LoadedModels>,
    permits: Arc<Semaphore>,
}

impl ModelRegistry {
    /// Create a registry with nothing loaded yet
    pub fn new(backend: Arc<dyn ModelBackend>, max_concurrent_inference: usize) -> Self {
        Self {
            backend,
            loaded: RwLock::new(LoadedModels::default()),
            permits: Arc::new(Semaphore::new(max_concurrent_inference.max(1))),
        }
    }

    /// Load every model. Failures are recorded, not returned.
    pub async fn initialize(&self) -> ModelAvailability {
        info!("Loading models from {} backend", self.backend.backend_name());

        let mut next = LoadedModels::default();

        match self.backend.load_pose().await {
            Ok(model) => next.pose = Some(model),
            Err(e) => {
                error!("Failed to load pose model: {}", e);
                next.errors.insert(ModelKind::Pose.to_string(), e.to_string());
            }
        }

        match self.backend.load_detector().await {
            Ok(model) => next.detector = Some(model),
            Err(e) => {
                error!("Failed to load detection model: {}", e);
                next.errors
                    .insert(ModelKind::Detection.to_string(), e.to_string());
            }
        }

        match self.backend.load_classifier().await {
            Ok(model) => next.classifier = Some(model),
            Err(e) => {
                warn!("Classification model not loaded, LLM strategy only: {}", e);
                next.errors
                    .insert(ModelKind::Classification.to_string(), e.to_string());
            }
        }

        *self.loaded.write() = next;

        let availability = self.availability();
        if availability.scans_ready() {
            info!("Models ready: {:?}", availability);
        } else {
            error!("Required models unavailable, scans are blocked: {:?}", availability);
        }
        availability
    }

    /// Re-run loading, replacing all handles
    pub async fn reload(&self) -> ModelAvailability {
        info!("Reloading models");
        self.initialize().await
    }

    /// Drop all handles; in-flight calls keep their own `Arc`s until they finish
    pub fn shutdown(&self) {
        info!("Releasing model handles");
        *self.loaded.write() = LoadedModels::default();
    }

    pub fn availability(&self) -> ModelAvailability {
        let loaded = self.loaded.read();
        ModelAvailability {
            pose: loaded.pose.is_some(),
            detection: loaded.detector.is_some(),
            classification: loaded.classifier.is_some(),
            errors: loaded.errors.clone(),
        }
    }

    pub fn scans_ready(&self) -> bool {
        let loaded = self.loaded.read();
        loaded.pose.is_some() && loaded.detector.is_some()
    }

    pub fn pose(&self) -> Result<Arc<dyn PoseEstimator>, DetectionError> {
        self.loaded
            .read()
            .pose
            .clone()
            .ok_or_else(|| DetectionError::ModelUnavailable {
                model: ModelKind::Pose.to_string(),
            })
    }

    pub fn detector(&self) -> Result<Arc<dyn ObjectDetector>, DetectionError> {
        self.loaded
            .read()
            .detector
            .clone()
            .ok_or_else(|| DetectionError::ModelUnavailable {
                model: ModelKind::Detection.to_string(),
            })
    }

    pub fn classifier(&self) -> Option<Arc<dyn ItemClassifier>> {
        self.loaded.read().classifier.clone()
    }

    /// Wait for a slot in the shared inference pool
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, DetectionError> {
        Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| DetectionError::Inference {
                details: "inference pool closed".to_string(),
            })
    }
}
