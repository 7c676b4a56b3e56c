use super::*;
use crate::classification::{
    ClassificationRecord, MockReasoningService, Strategy, WasteCategory,
};
use crate::config::SortyxConfig;
use crate::detector::PresenceResult;
use crate::error::{SessionError, SortyxError};
use crate::events::{EventFilter, HubEvent};
use crate::frame::{test_jpeg, Frame, Rect};
use crate::hub::TelemetryHub;
use crate::models::{MockModelBackend, ModelKind, ModelRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn timings() -> SessionTimings {
    SessionTimings::from(&SortyxConfig::default().session)
}

fn presence(object_present: bool, confidence: f32) -> PresenceResult {
    PresenceResult {
        hand_detected: true,
        wrist_detected: true,
        object_present,
        bounding_region: object_present.then(|| Rect::new(10.0, 10.0, 50.0, 50.0)),
        confidence,
        wrist_position: None,
        hand_side: None,
        object_label: None,
        message: String::new(),
    }
}

fn record() -> ClassificationRecord {
    ClassificationRecord::new(WasteCategory::Recyclable, 0.9, "can", "", Strategy::Model, 5)
}

fn frame() -> Frame {
    Frame::from_encoded(&test_jpeg(640, 480), 1280).unwrap()
}

struct Harness {
    backend: MockModelBackend,
    reasoning: MockReasoningService,
    hub: TelemetryHub,
    manager: Arc<SessionManager>,
    _cancel: CancellationToken,
}

fn fast_config() -> SortyxConfig {
    let mut config = SortyxConfig::default();
    config.session.startup_delay_ms = 0;
    config.session.poll_interval_ms = 1;
    config.detector.timeout_ms = 2000;
    config
}

async fn harness(config: SortyxConfig) -> Harness {
    let backend = MockModelBackend::new();
    backend.hold_object("bottle", 320.0, 240.0, 0.9);
    let registry = Arc::new(ModelRegistry::new(Arc::new(backend.clone()), 4));
    registry.initialize().await;

    let reasoning = MockReasoningService::default();
    let cancel = CancellationToken::new();
    let (hub, _task) = TelemetryHub::spawn(&config.hub, cancel.clone());
    let pipeline = Arc::new(ScanPipeline::new(
        &config,
        registry,
        Arc::new(reasoning.clone()),
        hub.clone(),
    ));
    let manager = Arc::new(SessionManager::new(pipeline, &config, Arc::new(SystemClock)));

    Harness {
        backend,
        reasoning,
        hub,
        manager,
        _cancel: cancel,
    }
}

#[test]
fn test_timed_cycle_with_manual_clock() {
    let clock = ManualClock::new();
    let mut session = ScanSession::new("s", timings(), Arc::new(clock.clone()));

    assert_eq!(session.begin_frame(), Err(FrameRejection::Starting));
    clock.advance(Duration::from_millis(1000));
    assert_eq!(session.phase(), Phase::Scanning);

    // Nothing in hand: the next frame waits for the poll interval
    let ticket = session.begin_frame().unwrap();
    assert_eq!(session.begin_frame(), Err(FrameRejection::Busy));
    assert!(!session.presence(ticket, &presence(false, 0.0)).unwrap());
    assert_eq!(session.begin_frame(), Err(FrameRejection::Throttled));
    clock.advance(Duration::from_millis(500));
    let ticket = session.begin_frame().unwrap();

    assert!(session.presence(ticket, &presence(true, 0.9)).unwrap());
    assert_eq!(session.phase(), Phase::PresenceConfirmed);
    session.begin_classifying(ticket).unwrap();
    assert_eq!(session.begin_frame(), Err(FrameRejection::Busy));

    session.complete(ticket, record()).unwrap();
    let state = session.snapshot();
    assert_eq!(state.phase, Phase::Cooldown);
    assert!(state.result_visible);
    assert!(state.last_result.is_some());

    clock.advance(Duration::from_millis(3000));
    let state = session.snapshot();
    assert_eq!(state.phase, Phase::Cooldown);
    assert!(!state.result_visible);
    assert_eq!(session.begin_frame(), Err(FrameRejection::Cooldown));

    clock.advance(Duration::from_millis(1000));
    assert_eq!(session.phase(), Phase::Scanning);
    session.begin_frame().unwrap();
}

#[test]
fn test_low_confidence_presence_is_not_confirmed() {
    let clock = ManualClock::new();
    let mut session = ScanSession::new("s", timings(), Arc::new(clock.clone()));
    clock.advance(Duration::from_millis(1000));

    let ticket = session.begin_frame().unwrap();
    assert!(!session.presence(ticket, &presence(true, 0.1)).unwrap());
    assert_eq!(session.phase(), Phase::Scanning);
}

#[test]
fn test_invalid_transitions_are_refused() {
    let clock = ManualClock::new();
    let mut session = ScanSession::new("s", timings(), Arc::new(clock.clone()));
    clock.advance(Duration::from_millis(1000));
    let ticket = session.begin_frame().unwrap();

    // Classifying and completion need a confirmed presence first
    assert!(matches!(
        session.begin_classifying(ticket),
        Err(SessionError::InvalidTransition { .. })
    ));
    assert!(matches!(
        session.complete(ticket, record()),
        Err(SessionError::InvalidTransition { .. })
    ));
    assert!(session.presence(ticket, &presence(true, 0.9)).unwrap());
    assert!(matches!(
        session.presence(ticket, &presence(true, 0.9)),
        Err(SessionError::InvalidTransition { .. })
    ));
}

#[test]
fn test_released_ticket_cannot_drive_the_session() {
    let clock = ManualClock::new();
    let mut session = ScanSession::new("s", timings(), Arc::new(clock.clone()));
    clock.advance(Duration::from_millis(1000));

    let old = session.begin_frame().unwrap();
    assert!(session.presence(old, &presence(true, 0.9)).unwrap());
    session.begin_classifying(old).unwrap();

    session.stop();
    session.restart();
    clock.advance(Duration::from_millis(1000));
    let current = session.begin_frame().unwrap();
    assert_ne!(old, current);

    // The old cycle finishing late leaves the new frame's claim alone
    assert!(matches!(
        session.complete(old, record()),
        Err(SessionError::Cancelled { .. })
    ));
    assert!(matches!(
        session.presence(old, &presence(true, 0.9)),
        Err(SessionError::Cancelled { .. })
    ));
    session.abort_frame(old);
    let state = session.snapshot();
    assert_eq!(state.phase, Phase::Scanning);
    assert!(state.frame_in_flight);
    assert!(state.last_result.is_none());

    assert!(session.presence(current, &presence(true, 0.9)).unwrap());
    session.begin_classifying(current).unwrap();
    session.complete(current, record()).unwrap();
    assert_eq!(session.phase(), Phase::Cooldown);
}

#[test]
fn test_invalid_region_returns_to_scanning() {
    let clock = ManualClock::new();
    let mut session = ScanSession::new("s", timings(), Arc::new(clock.clone()));
    clock.advance(Duration::from_millis(1000));

    let ticket = session.begin_frame().unwrap();
    session.presence(ticket, &presence(true, 0.9)).unwrap();
    session.invalid_region(ticket).unwrap();

    assert_eq!(session.phase(), Phase::Scanning);
    assert!(!session.snapshot().frame_in_flight);
    session.begin_frame().unwrap();
}

#[test]
fn test_stop_and_restart() {
    let clock = ManualClock::new();
    let mut session = ScanSession::new("s", timings(), Arc::new(clock.clone()));
    clock.advance(Duration::from_millis(1000));
    assert_eq!(session.phase(), Phase::Scanning);

    session.stop();
    clock.advance(Duration::from_millis(5000));
    assert_eq!(session.begin_frame(), Err(FrameRejection::Stopped));

    session.restart();
    assert_eq!(session.begin_frame(), Err(FrameRejection::Starting));
    clock.advance(Duration::from_millis(1000));
    session.begin_frame().unwrap();
}

#[tokio::test]
async fn test_full_cycle_publishes_result() {
    let h = harness(fast_config()).await;
    let mut observer = h.hub.subscribe(EventFilter::All, "test");

    let state = h.manager.start(Some("kiosk".to_string()));
    assert_eq!(state.phase, Phase::Scanning);

    let outcome = h
        .manager
        .submit_frame("kiosk", frame(), None, None)
        .await
        .unwrap();
    let record = match outcome {
        ScanOutcome::Classified { record, .. } => record,
        other => panic!("Expected a classification, got {:?}", other),
    };
    assert_eq!(record.category, WasteCategory::Recyclable);
    assert_eq!(record.strategy_used, Strategy::Model);

    let event = tokio::time::timeout(Duration::from_millis(200), observer.recv())
        .await
        .unwrap()
        .unwrap();
    match event {
        HubEvent::ClassificationComplete { session_id, record: published } => {
            assert_eq!(session_id.as_deref(), Some("kiosk"));
            assert_eq!(published.tracking_token, record.tracking_token);
        }
        other => panic!("Unexpected event {}", other.description()),
    }

    let state = h.manager.state("kiosk").unwrap();
    assert_eq!(state.phase, Phase::Cooldown);
    assert_eq!(state.last_result.map(|r| r.tracking_token), Some(record.tracking_token));
}

#[tokio::test]
async fn test_one_frame_in_flight_per_session() {
    let h = harness(fast_config()).await;
    h.backend.set_latency(Duration::from_millis(150));
    h.manager.start(Some("a".to_string()));

    let manager = Arc::clone(&h.manager);
    let first =
        tokio::spawn(async move { manager.submit_frame("a", frame(), None, None).await });

    tokio::time::sleep(Duration::from_millis(30)).await;
    let second = h.manager.submit_frame("a", frame(), None, None).await.unwrap();
    match second {
        ScanOutcome::Rejected { reason, .. } => assert_eq!(reason.reason(), "busy"),
        other => panic!("Expected busy rejection, got {:?}", other),
    }

    let first = first.await.unwrap().unwrap();
    assert!(matches!(first, ScanOutcome::Classified { .. }));
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let h = harness(fast_config()).await;
    h.backend.set_latency(Duration::from_millis(50));
    h.manager.start(Some("left".to_string()));
    h.manager.start(Some("right".to_string()));

    let (left, right) = tokio::join!(
        h.manager.submit_frame("left", frame(), None, None),
        h.manager.submit_frame("right", frame(), Some(Strategy::Llm), None),
    );

    let left = match left.unwrap() {
        ScanOutcome::Classified { record, .. } => record,
        other => panic!("Unexpected outcome {:?}", other),
    };
    let right = match right.unwrap() {
        ScanOutcome::Classified { record, .. } => record,
        other => panic!("Unexpected outcome {:?}", other),
    };
    assert_eq!(left.strategy_used, Strategy::Model);
    assert_eq!(right.strategy_used, Strategy::Llm);
    assert_ne!(left.tracking_token, right.tracking_token);

    h.manager.end("left").unwrap();
    assert_eq!(h.manager.state("right").unwrap().phase, Phase::Cooldown);

    let stats = h.hub.stats().await.unwrap();
    assert_eq!(stats.total_classifications, 2);
}

#[tokio::test]
async fn test_reasoning_timeout_still_reaches_result() {
    let mut config = fast_config();
    config.llm.timeout_ms = 50;
    let h = harness(config).await;
    h.reasoning.set_latency(Duration::from_millis(500));
    h.manager.start(Some("s".to_string()));

    let outcome = h
        .manager
        .submit_frame("s", frame(), Some(Strategy::Llm), None)
        .await
        .unwrap();
    let record = match outcome {
        ScanOutcome::Classified { record, .. } => record,
        other => panic!("Unexpected outcome {:?}", other),
    };
    assert_eq!(record.category, WasteCategory::Unknown);
    assert_eq!(record.strategy_used, Strategy::Llm);
    assert_eq!(record.confidence, 0.0);

    let state = h.manager.state("s").unwrap();
    assert!(state.last_result.is_some());
    assert!(!state.frame_in_flight);
}

#[tokio::test]
async fn test_classifying_timeout_forces_unknown() {
    let mut config = fast_config();
    config.session.classifying_timeout_ms = 100;
    let h = harness(config).await;
    h.reasoning.set_latency(Duration::from_millis(1000));
    h.manager.start(Some("s".to_string()));

    let outcome = h
        .manager
        .submit_frame("s", frame(), Some(Strategy::Llm), None)
        .await
        .unwrap();
    match outcome {
        ScanOutcome::Classified { record, .. } => {
            assert_eq!(record.category, WasteCategory::Unknown);
            assert_eq!(record.confidence, 0.0);
        }
        other => panic!("Unexpected outcome {:?}", other),
    }

    assert_eq!(h.manager.state("s").unwrap().phase, Phase::Cooldown);
    assert_eq!(h.hub.stats().await.unwrap().total_classifications, 1);
}

#[tokio::test]
async fn test_classifying_timeout_names_the_fallback_strategy() {
    let mut config = fast_config();
    config.session.classifying_timeout_ms = 100;
    let h = harness(config).await;
    h.backend.set_classification("plastic bottle", 0.4);
    h.reasoning.set_latency(Duration::from_millis(1000));
    h.manager.start(Some("s".to_string()));

    let outcome = h.manager.submit_frame("s", frame(), None, None).await.unwrap();
    match outcome {
        ScanOutcome::Classified { record, .. } => {
            assert_eq!(record.category, WasteCategory::Unknown);
            assert_eq!(record.strategy_used, Strategy::Llm);
            assert!(record.explanation.contains("llm"));
        }
        other => panic!("Unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn test_stop_cancels_the_frame_in_flight() {
    let h = harness(fast_config()).await;
    h.reasoning.set_latency(Duration::from_millis(400));
    h.manager.start(Some("s".to_string()));

    let manager = Arc::clone(&h.manager);
    let pending = tokio::spawn(async move {
        manager
            .submit_frame("s", frame(), Some(Strategy::Llm), None)
            .await
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    h.manager.stop("s").unwrap();

    let result = tokio::time::timeout(Duration::from_millis(200), pending)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        result,
        Err(SortyxError::Session(SessionError::Cancelled { .. }))
    ));
    let state = h.manager.state("s").unwrap();
    assert_eq!(state.phase, Phase::Idle);
    assert!(!state.frame_in_flight);
    assert!(state.last_result.is_none());
}

#[tokio::test]
async fn test_restart_during_a_frame_keeps_one_cycle_per_session() {
    let h = harness(fast_config()).await;
    h.reasoning.set_latency(Duration::from_millis(400));
    h.manager.start(Some("s".to_string()));

    let manager = Arc::clone(&h.manager);
    let stale = tokio::spawn(async move {
        manager
            .submit_frame("s", frame(), Some(Strategy::Llm), None)
            .await
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.manager.state("s").unwrap().frame_in_flight);
    h.manager.stop("s").unwrap();
    h.manager.start(Some("s".to_string()));

    let current = h
        .manager
        .submit_frame("s", frame(), Some(Strategy::Llm), None)
        .await
        .unwrap();
    let record = match current {
        ScanOutcome::Classified { record, .. } => record,
        other => panic!("Expected a classification, got {:?}", other),
    };

    assert!(matches!(
        stale.await.unwrap(),
        Err(SortyxError::Session(SessionError::Cancelled { .. }))
    ));

    let state = h.manager.state("s").unwrap();
    assert_eq!(state.phase, Phase::Cooldown);
    assert!(!state.frame_in_flight);
    assert_eq!(
        state.last_result.map(|r| r.tracking_token),
        Some(record.tracking_token)
    );
    assert_eq!(h.hub.stats().await.unwrap().total_classifications, 1);
}

#[tokio::test]
async fn test_busy_session_rejects_payload_before_decoding() {
    let h = harness(fast_config()).await;
    h.backend.set_latency(Duration::from_millis(150));
    h.manager.start(Some("s".to_string()));

    let manager = Arc::clone(&h.manager);
    let first = tokio::spawn(async move { manager.submit_frame("s", frame(), None, None).await });

    tokio::time::sleep(Duration::from_millis(30)).await;
    // Not an image at all; a busy session never looks at it
    let second = h
        .manager
        .submit_payload("s", "%%%".to_string(), None, None)
        .await
        .unwrap();
    assert!(matches!(
        second,
        ScanOutcome::Rejected {
            reason: FrameRejection::Busy,
            ..
        }
    ));
    assert!(matches!(
        first.await.unwrap().unwrap(),
        ScanOutcome::Classified { .. }
    ));
}

#[tokio::test]
async fn test_undecodable_payload_releases_the_session() {
    let h = harness(fast_config()).await;
    h.manager.start(Some("s".to_string()));

    let result = h
        .manager
        .submit_payload("s", "%%%".to_string(), None, None)
        .await;
    assert!(matches!(result, Err(SortyxError::Frame(_))));
    let state = h.manager.state("s").unwrap();
    assert_eq!(state.phase, Phase::Scanning);
    assert!(!state.frame_in_flight);
}

#[tokio::test]
async fn test_ending_a_session_cancels_its_frame() {
    let h = harness(fast_config()).await;
    h.backend.set_latency(Duration::from_millis(300));
    h.manager.start(Some("gone".to_string()));

    let manager = Arc::clone(&h.manager);
    let pending =
        tokio::spawn(async move { manager.submit_frame("gone", frame(), None, None).await });

    tokio::time::sleep(Duration::from_millis(30)).await;
    h.manager.end("gone").unwrap();

    let result = pending.await.unwrap();
    assert!(matches!(
        result,
        Err(SortyxError::Session(SessionError::Cancelled { .. }))
    ));
    assert!(matches!(
        h.manager.state("gone"),
        Err(SessionError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_missing_models_block_scans() {
    let backend = MockModelBackend::new();
    backend.fail_loading(ModelKind::Pose, true);
    let registry = Arc::new(ModelRegistry::new(Arc::new(backend), 1));
    registry.initialize().await;

    let config = fast_config();
    let (hub, _task) = TelemetryHub::spawn(&config.hub, CancellationToken::new());
    let pipeline = Arc::new(ScanPipeline::new(
        &config,
        registry,
        Arc::new(MockReasoningService::default()),
        hub,
    ));
    let manager = SessionManager::new(pipeline, &config, Arc::new(SystemClock));
    manager.start(Some("s".to_string()));

    assert!(matches!(
        manager.submit_frame("s", frame(), None, None).await,
        Err(SortyxError::Detection(_))
    ));
}

#[tokio::test]
async fn test_scan_once_without_session() {
    let h = harness(fast_config()).await;
    let pipeline = Arc::clone(h.manager.pipeline());

    match pipeline.scan_once(&frame(), None, None).await.unwrap() {
        ScanOutcome::Classified { region, .. } => {
            assert!(region.width() > 120.0);
        }
        other => panic!("Unexpected outcome {:?}", other),
    }

    h.backend.clear_scene();
    assert!(matches!(
        pipeline.scan_once(&frame(), None, None).await.unwrap(),
        ScanOutcome::Presence { .. }
    ));
}
