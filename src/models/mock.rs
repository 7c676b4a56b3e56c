use super::{
    ClassifierOutput, InferenceImage, ItemClassifier, Keypoint, ModelBackend, ModelKind,
    ObjectDetection, ObjectDetector, Pose, PoseEstimator, Side,
};
use crate::error::{ClassificationError, DetectionError};
use crate::frame::Rect;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

struct MockState {
    poses: Mutex<Vec<Pose>>,
    detections: Mutex<Vec<ObjectDetection>>,
    classification: Mutex<Result<ClassifierOutput, String>>,
    latency: Mutex<Duration>,
    load_failures: Mutex<BTreeSet<ModelKind>>,
    inference_calls: AtomicUsize,
}

impl MockState {
    async fn simulate_latency(&self) {
        self.inference_calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

/// Scripted model backend for running the pipeline without an inference server
#[derive(Clone)]
pub struct MockModelBackend {
    state: Arc<MockState>,
}

impl Default for MockModelBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockModelBackend {
    /// Backend whose models load, see nobody and classify everything as plastic
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockState {
                poses: Mutex::new(Vec::new()),
                detections: Mutex::new(Vec::new()),
                classification: Mutex::new(Ok(ClassifierOutput {
                    label: "plastic bottle".to_string(),
                    confidence: 0.9,
                })),
                latency: Mutex::new(Duration::ZERO),
                load_failures: Mutex::new(BTreeSet::new()),
                inference_calls: AtomicUsize::new(0),
            }),
        }
    }

    pub fn set_poses(&self, poses: Vec<Pose>) {
        *self.state.poses.lock() = poses;
    }

    pub fn set_detections(&self, detections: Vec<ObjectDetection>) {
        *self.state.detections.lock() = detections;
    }

    pub fn set_classification(&self, label: &str, confidence: f32) {
        *self.state.classification.lock() = Ok(ClassifierOutput {
            label: label.to_string(),
            confidence,
        });
    }

    pub fn fail_classification(&self, details: &str) {
        *self.state.classification.lock() = Err(details.to_string());
    }

    /// Delay applied to every inference call
    pub fn set_latency(&self, latency: Duration) {
        *self.state.latency.lock() = latency;
    }

    pub fn fail_loading(&self, kind: ModelKind, fail: bool) {
        let mut failures = self.state.load_failures.lock();
        if fail {
            failures.insert(kind);
        } else {
            failures.remove(&kind);
        }
    }

    pub fn inference_calls(&self) -> usize {
        self.state.inference_calls.load(Ordering::SeqCst)
    }

    /// Script a person holding `label` in the right hand with the wrist at (`x`, `y`)
    pub fn hold_object(&self, label: &str, x: f32, y: f32, confidence: f32) {
        self.set_poses(vec![arm_pose(Side::Right, (x, y), (x, y + 80.0), confidence)]);
        self.set_detections(vec![ObjectDetection {
            label: label.to_string(),
            confidence,
            bbox: Rect::new(x - 60.0, y - 100.0, x + 60.0, y + 20.0),
        }]);
    }

    /// Script an empty scene
    pub fn clear_scene(&self) {
        self.set_poses(Vec::new());
        self.set_detections(Vec::new());
    }

    fn check_load(&self, kind: ModelKind) -> bool {
        !self.state.load_failures.lock().contains(&kind)
    }
}

/// Pose with a single visible arm; shoulder sits above the elbow
pub fn arm_pose(side: Side, wrist: (f32, f32), elbow: (f32, f32), confidence: f32) -> Pose {
    let mut pose = Pose::default();
    pose.set(side.wrist(), Keypoint::new(wrist.0, wrist.1, confidence));
    pose.set(side.elbow(), Keypoint::new(elbow.0, elbow.1, confidence));
    pose.set(
        side.shoulder(),
        Keypoint::new(elbow.0, elbow.1 + (elbow.1 - wrist.1), confidence),
    );
    pose
}

struct MockPose(Arc<MockState>);
struct MockDetector(Arc<MockState>);
struct MockClassifier(Arc<MockState>);

#[async_trait]
impl PoseEstimator for MockPose {
    async fn estimate(&self, _image: &InferenceImage) -> Result<Vec<Pose>, DetectionError> {
        self.0.simulate_latency().await;
        Ok(self.0.poses.lock().clone())
    }
}

#[async_trait]
impl ObjectDetector for MockDetector {
    async fn detect(
        &self,
        _image: &InferenceImage,
    ) -> Result<Vec<ObjectDetection>, DetectionError> {
        self.0.simulate_latency().await;
        Ok(self.0.detections.lock().clone())
    }
}

#[async_trait]
impl ItemClassifier for MockClassifier {
    async fn classify(
        &self,
        _image: &InferenceImage,
    ) -> Result<ClassifierOutput, ClassificationError> {
        self.0.simulate_latency().await;
        self.0
            .classification
            .lock()
            .clone()
            .map_err(|details| ClassificationError::Inference { details })
    }
}

#[async_trait]
impl ModelBackend for MockModelBackend {
    async fn load_pose(&self) -> Result<Arc<dyn PoseEstimator>, DetectionError> {
        if !self.check_load(ModelKind::Pose) {
            return Err(DetectionError::ModelUnavailable {
                model: "mock-pose".to_string(),
            });
        }
        debug!("Mock pose model loaded");
        Ok(Arc::new(MockPose(Arc::clone(&self.state))))
    }

    async fn load_detector(&self) -> Result<Arc<dyn ObjectDetector>, DetectionError> {
        if !self.check_load(ModelKind::Detection) {
            return Err(DetectionError::ModelUnavailable {
                model: "mock-detector".to_string(),
            });
        }
        debug!("Mock detection model loaded");
        Ok(Arc::new(MockDetector(Arc::clone(&self.state))))
    }

    async fn load_classifier(&self) -> Result<Arc<dyn ItemClassifier>, ClassificationError> {
        if !self.check_load(ModelKind::Classification) {
            return Err(ClassificationError::ModelUnavailable);
        }
        debug!("Mock classification model loaded");
        Ok(Arc::new(MockClassifier(Arc::clone(&self.state))))
    }

    fn backend_name(&self) -> &str {
        "mock"
    }
}
