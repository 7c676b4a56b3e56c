use super::*;
use crate::config::SortyxConfig;
use crate::frame::test_jpeg;
use crate::hub::TelemetryHub;
use crate::models::{InferenceImage, MockModelBackend, ModelKind, ModelRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct Harness {
    backend: MockModelBackend,
    reasoning: MockReasoningService,
    hub: TelemetryHub,
    router: ClassificationRouter,
    _cancel: CancellationToken,
}

async fn harness_with(backend: MockModelBackend, config: SortyxConfig) -> Harness {
    let registry = Arc::new(ModelRegistry::new(Arc::new(backend.clone()), 2));
    registry.initialize().await;

    let reasoning = MockReasoningService::default();
    let cancel = CancellationToken::new();
    let (hub, _task) = TelemetryHub::spawn(&config.hub, cancel.clone());
    let router = ClassificationRouter::new(
        registry,
        Arc::new(reasoning.clone()),
        hub.clone(),
        config.router.clone(),
        config.llm.timeout_ms,
    );

    Harness {
        backend,
        reasoning,
        hub,
        router,
        _cancel: cancel,
    }
}

async fn harness() -> Harness {
    harness_with(MockModelBackend::new(), SortyxConfig::default()).await
}

fn crop() -> InferenceImage {
    InferenceImage {
        jpeg: Arc::new(test_jpeg(32, 32)),
        width: 32,
        height: 32,
    }
}

#[test]
fn test_fallback_policy() {
    use FallbackDecision::*;
    use ModelOutcome::*;

    assert_eq!(fallback_decision(Scored(0.9), 0.6, true), Accept);
    assert_eq!(fallback_decision(Scored(0.6), 0.6, true), Accept);
    assert_eq!(fallback_decision(Scored(0.4), 0.6, true), UseLlm);
    assert_eq!(fallback_decision(Scored(0.4), 0.6, false), Accept);
    assert_eq!(fallback_decision(Unavailable, 0.6, true), UseLlm);
    assert_eq!(fallback_decision(Failed, 0.6, true), UseLlm);
    assert_eq!(fallback_decision(Unavailable, 0.6, false), Unknown);
    assert_eq!(fallback_decision(Failed, 0.6, false), Unknown);
    assert_eq!(fallback_decision(Scored(f32::NAN), 0.6, true), UseLlm);
}

#[tokio::test]
async fn test_confident_model_result_is_kept() {
    let h = harness().await;

    let record = h.router.classify(&crop(), None, None).await;
    assert_eq!(record.category, WasteCategory::Recyclable);
    assert_eq!(record.strategy_used, Strategy::Model);
    assert_eq!(record.item_label, "plastic bottle");
    assert_eq!(record.bin_color, BinColor::Green);
    assert_eq!(h.reasoning.calls(), 0);
}

#[tokio::test]
async fn test_low_confidence_falls_back_to_llm() {
    let h = harness().await;
    h.backend.set_classification("plastic bottle", 0.4);

    let record = h.router.classify(&crop(), Some(Strategy::Model), None).await;
    assert_eq!(record.strategy_used, Strategy::Llm);
    assert_eq!(record.category, WasteCategory::Recyclable);
    assert_eq!(h.reasoning.calls(), 1);

    let kept = h.router.classify(&crop(), Some(Strategy::Model), Some(false)).await;
    assert_eq!(kept.strategy_used, Strategy::Model);
    assert!((kept.confidence - 0.4).abs() < 1e-6);
    assert_eq!(h.reasoning.calls(), 1);
}

#[tokio::test]
async fn test_tracked_progress_follows_the_fallback() {
    let h = harness().await;
    let progress = parking_lot::Mutex::new(Strategy::Model);

    h.router
        .classify_tracked(&crop(), Some(Strategy::Model), None, &progress)
        .await;
    assert_eq!(*progress.lock(), Strategy::Model);

    h.backend.set_classification("plastic bottle", 0.4);
    let record = h
        .router
        .classify_tracked(&crop(), Some(Strategy::Model), None, &progress)
        .await;
    assert_eq!(record.strategy_used, Strategy::Llm);
    assert_eq!(*progress.lock(), Strategy::Llm);
}

#[tokio::test]
async fn test_missing_classifier_routes_to_llm() {
    let backend = MockModelBackend::new();
    backend.fail_loading(ModelKind::Classification, true);
    let h = harness_with(backend, SortyxConfig::default()).await;

    let record = h.router.classify(&crop(), Some(Strategy::Model), None).await;
    assert_eq!(record.strategy_used, Strategy::Llm);

    let record = h.router.classify(&crop(), Some(Strategy::Model), Some(false)).await;
    assert_eq!(record.category, WasteCategory::Unknown);
    assert_eq!(record.strategy_used, Strategy::Model);
    assert_eq!(record.confidence, 0.0);
}

#[tokio::test]
async fn test_model_error_routes_to_llm() {
    let h = harness().await;
    h.backend.fail_classification("gpu fell over");

    let record = h.router.classify(&crop(), None, None).await;
    assert_eq!(record.strategy_used, Strategy::Llm);
    assert_eq!(h.reasoning.calls(), 1);
}

#[tokio::test]
async fn test_out_of_range_model_confidence_is_clamped() {
    let h = harness().await;
    h.backend.set_classification("aluminum can", 1.3);

    let record = h.router.classify(&crop(), None, None).await;
    assert_eq!(record.confidence, 1.0);
    assert!(record.confidence_clamped);
    assert_eq!(record.strategy_used, Strategy::Model);
}

#[tokio::test]
async fn test_unusable_reasoning_replies_degrade_to_unknown() {
    let h = harness().await;

    h.reasoning.set_reply("I would rather not say");
    let malformed = h.router.classify(&crop(), Some(Strategy::Llm), None).await;
    assert_eq!(malformed.category, WasteCategory::Unknown);
    assert_eq!(malformed.strategy_used, Strategy::Llm);
    assert_eq!(malformed.confidence, 0.0);
    assert!(malformed.explanation.starts_with("Degraded mode"));

    h.reasoning.fail("connection reset");
    let failed = h.router.classify(&crop(), Some(Strategy::Llm), None).await;
    assert_eq!(failed.category, WasteCategory::Unknown);
    assert_eq!(failed.confidence, 0.0);
}

#[tokio::test]
async fn test_reasoning_timeout_degrades_to_unknown() {
    let mut config = SortyxConfig::default();
    config.llm.timeout_ms = 50;
    let h = harness_with(MockModelBackend::new(), config).await;
    h.reasoning.set_latency(Duration::from_millis(500));

    let record = h.router.classify(&crop(), Some(Strategy::Llm), None).await;
    assert_eq!(record.category, WasteCategory::Unknown);
    assert_eq!(record.strategy_used, Strategy::Llm);
    assert_eq!(record.confidence, 0.0);
    assert!(record.explanation.contains("50ms"));
}

#[tokio::test]
async fn test_every_classification_is_counted() {
    let h = harness().await;

    h.router.classify(&crop(), Some(Strategy::Model), None).await;
    h.router.classify(&crop(), Some(Strategy::Llm), None).await;
    h.reasoning.set_reply("");
    h.router.classify(&crop(), Some(Strategy::Llm), None).await;

    let stats = h.hub.stats().await.unwrap();
    assert_eq!(stats.total_classifications, 3);
    assert_eq!(stats.model_classifications, 1);
    assert_eq!(stats.llm_classifications, 2);
    assert_eq!(stats.count(WasteCategory::Recyclable), 2);
    assert_eq!(stats.count(WasteCategory::Unknown), 1);
}

#[test]
fn test_strategy_names() {
    let strategy: Strategy = serde_json::from_str("\"LLM\"").unwrap();
    assert_eq!(strategy, Strategy::Llm);
    let strategy: Strategy = serde_json::from_str("\"model\"").unwrap();
    assert_eq!(strategy, Strategy::Model);
    assert_eq!(serde_json::to_string(&Strategy::Llm).unwrap(), "\"llm\"");
}

#[test]
fn test_category_metadata() {
    for category in WasteCategory::ALL {
        assert!(!category.display_name().is_empty());
        assert_eq!(category.disposal_code().len(), 3);
    }
    assert_eq!(WasteCategory::Sharp.bin_color(), BinColor::White);
    assert_eq!(WasteCategory::Infectious.to_string(), "Infectious");
}
