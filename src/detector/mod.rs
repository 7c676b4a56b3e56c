//! Presence detection: is a hand holding an object in front of the camera?
//!
//! The detector runs the pose and object models on the same frame and then
//! applies [`evaluate_presence`], a pure policy over their outputs.

#[cfg(test)]
mod tests;

use crate::config::DetectorConfig;
use crate::error::DetectionError;
use crate::frame::{Frame, Rect};
use crate::models::{InferenceImage, Keypoint, ModelRegistry, ObjectDetection, Pose, Side};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Outcome of presence detection for one frame
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PresenceResult {
    /// A person with a visible wrist was seen, whatever its confidence
    pub hand_detected: bool,
    /// A wrist passed the confidence threshold
    pub wrist_detected: bool,
    /// An object overlaps the chosen wrist neighborhood
    pub object_present: bool,
    /// Object box clamped to the frame, when present
    pub bounding_region: Option<Rect>,
    /// Object confidence when present, otherwise the chosen wrist confidence
    pub confidence: f32,
    pub wrist_position: Option<Keypoint>,
    pub hand_side: Option<Side>,
    pub object_label: Option<String>,
    pub message: String,
}

impl PresenceResult {
    fn nothing(hand_detected: bool, message: &str) -> Self {
        Self {
            hand_detected,
            wrist_detected: false,
            object_present: false,
            bounding_region: None,
            confidence: 0.0,
            wrist_position: None,
            hand_side: None,
            object_label: None,
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct HandCandidate<'a> {
    pose: &'a Pose,
    side: Side,
    arm_confidence: f32,
}

fn unit(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Square around the hand, pushed past the wrist along the forearm
pub fn wrist_neighborhood(pose: &Pose, side: Side, config: &DetectorConfig) -> Rect {
    let wrist = pose.get(side.wrist());
    let elbow = pose.get(side.elbow());
    let shoulder = pose.get(side.shoulder());

    let anchor = if elbow.is_valid(config.elbow_confidence_threshold) {
        Some(elbow)
    } else if shoulder.is_valid(config.elbow_confidence_threshold) {
        Some(shoulder)
    } else {
        None
    };

    let (cx, cy) = match anchor {
        Some(anchor) => (
            wrist.x + (wrist.x - anchor.x) * config.hand_extension,
            wrist.y + (wrist.y - anchor.y) * config.hand_extension,
        ),
        None => (wrist.x, wrist.y),
    };

    Rect::centered(cx, cy, config.neighborhood_half_size)
}

/// Decide presence from raw model outputs
pub fn evaluate_presence(
    poses: &[Pose],
    detections: &[ObjectDetection],
    frame_width: u32,
    frame_height: u32,
    config: &DetectorConfig,
) -> PresenceResult {
    let hand_detected = poses.iter().any(|pose| {
        [Side::Left, Side::Right]
            .iter()
            .any(|side| pose.get(side.wrist()).confidence > 0.0)
    });

    let mut best: Option<HandCandidate> = None;
    for pose in poses {
        for side in [Side::Left, Side::Right] {
            if !pose.get(side.wrist()).is_valid(config.wrist_confidence_threshold) {
                continue;
            }
            let candidate = HandCandidate {
                pose,
                side,
                arm_confidence: pose.arm_confidence(side),
            };
            // Strictly greater keeps the earlier candidate on ties
            if best.map_or(true, |b| candidate.arm_confidence > b.arm_confidence) {
                best = Some(candidate);
            }
        }
    }

    let Some(hand) = best else {
        return PresenceResult::nothing(hand_detected, "No wrist detected");
    };

    let wrist = *hand.pose.get(hand.side.wrist());
    let neighborhood =
        wrist_neighborhood(hand.pose, hand.side, config).clamp_to(frame_width, frame_height);

    let mut result = PresenceResult {
        hand_detected: true,
        wrist_detected: true,
        object_present: false,
        bounding_region: None,
        confidence: unit(wrist.confidence),
        wrist_position: Some(wrist),
        hand_side: Some(hand.side),
        object_label: None,
        message: "Hand detected, no object in hand".to_string(),
    };

    if neighborhood.area() <= 0.0 {
        result.message = "Hand is outside the frame".to_string();
        return result;
    }

    let mut held: Option<(&ObjectDetection, Rect, f32)> = None;
    for detection in detections {
        if detection.label.eq_ignore_ascii_case("person")
            || !detection.confidence.is_finite()
            || detection.confidence < config.object_confidence_threshold
            || !detection.bbox.is_finite()
        {
            continue;
        }

        let bbox = detection.bbox.clamp_to(frame_width, frame_height);
        let iou = bbox.iou(&neighborhood);
        if iou < config.iou_threshold {
            continue;
        }
        if held.map_or(true, |(_, _, best_iou)| iou > best_iou) {
            held = Some((detection, bbox, iou));
        }
    }

    if let Some((detection, bbox, iou)) = held {
        debug!(
            "Object '{}' in {:?} hand (iou {:.2}, confidence {:.2})",
            detection.label, hand.side, iou, detection.confidence
        );
        result.object_present = true;
        result.bounding_region = Some(bbox);
        result.confidence = unit(detection.confidence);
        result.object_label = Some(detection.label.clone());
        result.message = "Object detected in hand".to_string();
    }

    result
}

/// Runs the pose and object models against frames under a time budget
pub struct PresenceDetector {
    registry: Arc<ModelRegistry>,
    config: DetectorConfig,
    jpeg_quality: u8,
}

impl PresenceDetector {
    pub fn new(registry: Arc<ModelRegistry>, config: DetectorConfig, jpeg_quality: u8) -> Self {
        Self {
            registry,
            config,
            jpeg_quality,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Whether both models needed for detection are loaded
    pub fn is_ready(&self) -> bool {
        self.registry.scans_ready()
    }

    /// Detect a hand holding an object within `detector.timeout_ms`
    pub async fn detect(&self, frame: &Frame) -> Result<PresenceResult, DetectionError> {
        let budget_ms = self.config.timeout_ms;
        let started = Instant::now();

        match tokio::time::timeout(Duration::from_millis(budget_ms), self.run(frame)).await {
            Ok(Ok(result)) => {
                debug!(
                    "Presence detection took {}ms: {}",
                    started.elapsed().as_millis(),
                    result.message
                );
                Ok(result)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!("Presence detection exceeded {}ms budget", budget_ms);
                Err(DetectionError::Timeout { budget_ms })
            }
        }
    }

    async fn run(&self, frame: &Frame) -> Result<PresenceResult, DetectionError> {
        let pose_model = self.registry.pose()?;
        let object_model = self.registry.detector()?;

        let pixels = Arc::clone(&frame.image);
        let quality = self.jpeg_quality;
        let image = tokio::task::spawn_blocking(move || InferenceImage::encode(&pixels, quality))
            .await
            .map_err(|e| DetectionError::Inference {
                details: format!("frame encoding task failed: {}", e),
            })?
            .map_err(|e| DetectionError::Inference {
                details: e.to_string(),
            })?;

        let _permit = self.registry.acquire().await?;
        let (poses, detections) =
            tokio::try_join!(pose_model.estimate(&image), object_model.detect(&image))?;

        Ok(evaluate_presence(
            &poses,
            &detections,
            frame.width(),
            frame.height(),
            &self.config,
        ))
    }
}
