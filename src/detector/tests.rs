use super::*;
use crate::config::SortyxConfig;
use crate::frame::test_jpeg;
use crate::models::mock::arm_pose;
use crate::models::{KeypointIndex, MockModelBackend, ModelKind};

fn config() -> DetectorConfig {
    SortyxConfig::default().detector
}

fn bottle(bbox: Rect, confidence: f32) -> ObjectDetection {
    ObjectDetection {
        label: "bottle".to_string(),
        confidence,
        bbox,
    }
}

async fn detector_with(backend: MockModelBackend, config: DetectorConfig) -> PresenceDetector {
    let registry = Arc::new(ModelRegistry::new(Arc::new(backend), 2));
    registry.initialize().await;
    PresenceDetector::new(registry, config, 90)
}

fn frame() -> Frame {
    Frame::from_encoded(&test_jpeg(640, 480), 1280).unwrap()
}

#[test]
fn test_no_wrist_means_no_object() {
    let weak = arm_pose(Side::Right, (320.0, 240.0), (320.0, 320.0), 0.1);
    let detections = vec![bottle(Rect::new(260.0, 140.0, 380.0, 260.0), 0.95)];

    let result = evaluate_presence(&[weak], &detections, 640, 480, &config());
    assert!(result.hand_detected);
    assert!(!result.wrist_detected);
    assert!(!result.object_present);
    assert!(result.bounding_region.is_none());

    let empty = evaluate_presence(&[], &detections, 640, 480, &config());
    assert!(!empty.hand_detected);
    assert!(!empty.object_present);
    assert_eq!(empty.confidence, 0.0);
}

#[test]
fn test_object_in_hand_is_present() {
    let pose = arm_pose(Side::Right, (320.0, 240.0), (320.0, 320.0), 0.8);
    let detections = vec![bottle(Rect::new(260.0, 140.0, 380.0, 260.0), 0.7)];

    let result = evaluate_presence(&[pose], &detections, 640, 480, &config());
    assert!(result.object_present);
    assert_eq!(result.object_label.as_deref(), Some("bottle"));
    assert_eq!(result.hand_side, Some(Side::Right));
    assert!((result.confidence - 0.7).abs() < 1e-6);
    assert_eq!(
        result.bounding_region,
        Some(Rect::new(260.0, 140.0, 380.0, 260.0))
    );
}

#[test]
fn test_distant_object_is_not_in_hand() {
    let pose = arm_pose(Side::Right, (100.0, 300.0), (100.0, 380.0), 0.8);
    let detections = vec![bottle(Rect::new(500.0, 20.0, 620.0, 140.0), 0.9)];

    let result = evaluate_presence(&[pose], &detections, 640, 480, &config());
    assert!(result.wrist_detected);
    assert!(!result.object_present);
    assert!((result.confidence - 0.8).abs() < 1e-6);
}

#[test]
fn test_person_and_weak_detections_are_ignored() {
    let pose = arm_pose(Side::Left, (320.0, 240.0), (320.0, 320.0), 0.8);
    let region = Rect::new(260.0, 140.0, 380.0, 260.0);
    let detections = vec![
        ObjectDetection {
            label: "person".to_string(),
            confidence: 0.99,
            bbox: region,
        },
        bottle(region, 0.1),
        bottle(region, f32::NAN),
    ];

    let result = evaluate_presence(&[pose], &detections, 640, 480, &config());
    assert!(!result.object_present);
}

#[test]
fn test_strongest_arm_wins() {
    // Left arm near the bottle but weak overall, right arm far away and strong
    let mut pose = arm_pose(Side::Left, (150.0, 240.0), (150.0, 320.0), 0.4);
    let strong = arm_pose(Side::Right, (500.0, 240.0), (500.0, 320.0), 0.9);
    for index in [
        KeypointIndex::RightWrist,
        KeypointIndex::RightElbow,
        KeypointIndex::RightShoulder,
    ] {
        pose.set(index, *strong.get(index));
    }
    let detections = vec![bottle(Rect::new(90.0, 140.0, 210.0, 260.0), 0.9)];

    let result = evaluate_presence(&[pose], &detections, 640, 480, &config());
    assert_eq!(result.hand_side, Some(Side::Right));
    assert!(!result.object_present);
}

#[test]
fn test_tied_arms_keep_the_first_candidate() {
    let first = arm_pose(Side::Right, (150.0, 240.0), (150.0, 320.0), 0.7);
    let second = arm_pose(Side::Right, (500.0, 240.0), (500.0, 320.0), 0.7);
    let detections = vec![bottle(Rect::new(90.0, 140.0, 210.0, 260.0), 0.9)];

    let result = evaluate_presence(&[first, second], &detections, 640, 480, &config());
    assert!(result.object_present);
    assert_eq!(result.wrist_position.map(|w| w.x), Some(150.0));
}

#[test]
fn test_neighborhood_uses_shoulder_when_elbow_is_weak() {
    let mut pose = arm_pose(Side::Right, (300.0, 200.0), (300.0, 280.0), 0.8);
    pose.set(KeypointIndex::RightElbow, Keypoint::new(0.0, 0.0, 0.05));
    pose.set(KeypointIndex::RightShoulder, Keypoint::new(300.0, 400.0, 0.8));

    let config = config();
    let rect = wrist_neighborhood(&pose, Side::Right, &config);
    // Forearm vector (0, -200) extended by 0.35
    let center_y = (rect.y_min + rect.y_max) / 2.0;
    assert!((center_y - 130.0).abs() < 1e-3);
    assert!((rect.width() - 2.0 * config.neighborhood_half_size).abs() < 1e-3);
}

#[tokio::test]
async fn test_detect_with_mock_models() {
    let backend = MockModelBackend::new();
    backend.hold_object("bottle", 320.0, 240.0, 0.85);
    let detector = detector_with(backend.clone(), config()).await;

    let result = detector.detect(&frame()).await.unwrap();
    assert!(result.object_present);
    assert_eq!(backend.inference_calls(), 2);

    backend.clear_scene();
    let result = detector.detect(&frame()).await.unwrap();
    assert!(!result.object_present);
    assert!(!result.hand_detected);
}

#[tokio::test]
async fn test_missing_model_is_unavailable() {
    let backend = MockModelBackend::new();
    backend.fail_loading(ModelKind::Detection, true);
    let detector = detector_with(backend, config()).await;

    assert!(!detector.is_ready());
    assert!(matches!(
        detector.detect(&frame()).await,
        Err(DetectionError::ModelUnavailable { .. })
    ));
}

#[tokio::test]
async fn test_slow_models_hit_the_budget() {
    let backend = MockModelBackend::new();
    backend.set_latency(Duration::from_millis(500));
    let mut config = config();
    config.timeout_ms = 50;
    let detector = detector_with(backend, config).await;

    assert!(matches!(
        detector.detect(&frame()).await,
        Err(DetectionError::Timeout { budget_ms: 50 })
    ));
}
