//! HTTP inference backend.
//!
//! Models live in a separate inference server and are addressed by name:
//!
//! - `GET  {base}/v1/models/{name}` answers 200 once the model is loaded
//! - `POST {base}/v1/models/{name}/infer` with `{"image": "<base64 jpeg>"}`
//!
//! Pose models reply `{"persons": [{"keypoints": [[x, y, conf], ...]}]}`,
//! detectors `{"detections": [{"label", "confidence", "bbox": [x1, y1, x2, y2]}]}`
//! and classifiers `{"label", "confidence"}`, all in pixel coordinates of the
//! submitted image.

use super::{
    ClassifierOutput, InferenceImage, ItemClassifier, ModelBackend, ObjectDetection,
    ObjectDetector, Pose, PoseEstimator,
};
use crate::config::ModelsConfig;
use crate::error::{ClassificationError, DetectionError};
use crate::frame::Rect;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Serialize)]
struct InferRequest {
    image: String,
}

#[derive(Deserialize)]
struct PoseResponse {
    #[serde(default)]
    persons: Vec<PersonPayload>,
}

#[derive(Deserialize)]
struct PersonPayload {
    keypoints: Vec<[f32; 3]>,
}

#[derive(Deserialize)]
struct DetectionResponse {
    #[serde(default)]
    detections: Vec<DetectionPayload>,
}

#[derive(Deserialize)]
struct DetectionPayload {
    label: String,
    confidence: f32,
    bbox: [f32; 4],
}

/// Connection to one named model on the inference server
#[derive(Clone)]
struct RemoteModel {
    client: reqwest::Client,
    base_url: String,
    name: String,
}

impl RemoteModel {
    fn model_url(&self) -> String {
        format!("{}/v1/models/{}", self.base_url, self.name)
    }

    async fn check_loaded(&self) -> Result<(), String> {
        let response = self
            .client
            .get(self.model_url())
            .send()
            .await
            .map_err(|e| format!("{} unreachable: {}", self.name, e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!(
                "{} not loaded (status {})",
                self.name,
                response.status().as_u16()
            ))
        }
    }

    async fn infer<T: DeserializeOwned>(&self, image: &InferenceImage) -> Result<T, String> {
        let request = InferRequest {
            image: BASE64.encode(image.jpeg.as_slice()),
        };

        let response = self
            .client
            .post(format!("{}/infer", self.model_url()))
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("{} request failed: {}", self.name, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!(
                "{} returned status {}: {}",
                self.name,
                status.as_u16(),
                body
            ));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| format!("{} returned malformed output: {}", self.name, e))
    }
}

struct RemotePose(RemoteModel);
struct RemoteDetector(RemoteModel);
struct RemoteClassifier(RemoteModel);

#[async_trait]
impl PoseEstimator for RemotePose {
    async fn estimate(&self, image: &InferenceImage) -> Result<Vec<Pose>, DetectionError> {
        let response: PoseResponse = self
            .0
            .infer(image)
            .await
            .map_err(|details| DetectionError::Inference { details })?;

        debug!("{} found {} person(s)", self.0.name, response.persons.len());

        Ok(response
            .persons
            .iter()
            .map(|person| Pose::from_triples(&person.keypoints))
            .collect())
    }
}

#[async_trait]
impl ObjectDetector for RemoteDetector {
    async fn detect(
        &self,
        image: &InferenceImage,
    ) -> Result<Vec<ObjectDetection>, DetectionError> {
        let response: DetectionResponse = self
            .0
            .infer(image)
            .await
            .map_err(|details| DetectionError::Inference { details })?;

        Ok(response
            .detections
            .into_iter()
            .map(|d| ObjectDetection {
                label: d.label,
                confidence: d.confidence,
                bbox: Rect::new(d.bbox[0], d.bbox[1], d.bbox[2], d.bbox[3]),
            })
            .collect())
    }
}

#[async_trait]
impl ItemClassifier for RemoteClassifier {
    async fn classify(
        &self,
        image: &InferenceImage,
    ) -> Result<ClassifierOutput, ClassificationError> {
        self.0
            .infer(image)
            .await
            .map_err(|details| ClassificationError::Inference { details })
    }
}

/// Model backend backed by an HTTP inference server
pub struct RemoteModelBackend {
    client: reqwest::Client,
    base_url: String,
    pose_model: String,
    detection_model: String,
    classification_model: String,
}

impl RemoteModelBackend {
    pub fn new(config: &ModelsConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url: config.inference_url.trim_end_matches('/').to_string(),
            pose_model: config.pose_model.clone(),
            detection_model: config.detection_model.clone(),
            classification_model: config.classification_model.clone(),
        })
    }

    fn model(&self, name: &str) -> RemoteModel {
        RemoteModel {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl ModelBackend for RemoteModelBackend {
    async fn load_pose(&self) -> Result<Arc<dyn PoseEstimator>, DetectionError> {
        let model = self.model(&self.pose_model);
        model
            .check_loaded()
            .await
            .map_err(|_| DetectionError::ModelUnavailable {
                model: self.pose_model.clone(),
            })?;
        info!("Pose model {} available at {}", self.pose_model, self.base_url);
        Ok(Arc::new(RemotePose(model)))
    }

    async fn load_detector(&self) -> Result<Arc<dyn ObjectDetector>, DetectionError> {
        let model = self.model(&self.detection_model);
        model
            .check_loaded()
            .await
            .map_err(|_| DetectionError::ModelUnavailable {
                model: self.detection_model.clone(),
            })?;
        info!(
            "Detection model {} available at {}",
            self.detection_model, self.base_url
        );
        Ok(Arc::new(RemoteDetector(model)))
    }

    async fn load_classifier(&self) -> Result<Arc<dyn ItemClassifier>, ClassificationError> {
        let model = self.model(&self.classification_model);
        model
            .check_loaded()
            .await
            .map_err(|details| ClassificationError::Inference { details })?;
        info!(
            "Classification model {} available at {}",
            self.classification_model, self.base_url
        );
        Ok(Arc::new(RemoteClassifier(model)))
    }

    fn backend_name(&self) -> &str {
        "remote"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pose_payload_parsing() {
        let body = r#"{"persons": [{"keypoints": [[10.0, 20.0, 0.9], [11.0, 21.0, 0.8]]}]}"#;
        let response: PoseResponse = serde_json::from_str(body).unwrap();
        let pose = Pose::from_triples(&response.persons[0].keypoints);
        assert_eq!(pose.keypoints[1].x, 11.0);
        assert_eq!(pose.keypoints[16].confidence, 0.0);
    }

    #[test]
    fn test_detection_payload_defaults_to_empty() {
        let response: DetectionResponse = serde_json::from_str("{}").unwrap();
        assert!(response.detections.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_server_marks_models_unavailable() {
        let config = ModelsConfig {
            inference_url: "http://127.0.0.1:9/".to_string(),
            pose_model: "pose".to_string(),
            detection_model: "det".to_string(),
            classification_model: "cls".to_string(),
            request_timeout_ms: 200,
            max_concurrent_inference: 1,
        };
        let backend = RemoteModelBackend::new(&config).unwrap();
        assert_eq!(backend.base_url, "http://127.0.0.1:9");

        assert!(matches!(
            backend.load_pose().await,
            Err(DetectionError::ModelUnavailable { .. })
        ));
    }
}
