use super::llm::ReasoningService;
use super::normalize::{into_record, RawClassification};
use super::types::{ClassificationRecord, Strategy};
use crate::config::RouterConfig;
use crate::error::ClassificationError;
use crate::hub::TelemetryHub;
use crate::models::{ClassifierOutput, InferenceImage, ModelRegistry};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What the discriminative model produced for a crop
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModelOutcome {
    /// No classifier is loaded
    Unavailable,
    /// The classifier was called and failed
    Failed,
    /// Normalized confidence of the model's record
    Scored(f32),
}

/// Next step after the model strategy ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackDecision {
    /// Keep the model's record
    Accept,
    /// Re-run the crop through the reasoning service
    UseLlm,
    /// Give up with an Unknown record
    Unknown,
}

/// Fallback policy for the model strategy
pub fn fallback_decision(
    outcome: ModelOutcome,
    min_acceptance_confidence: f32,
    fallback_enabled: bool,
) -> FallbackDecision {
    match outcome {
        ModelOutcome::Scored(confidence) if confidence >= min_acceptance_confidence => {
            FallbackDecision::Accept
        }
        ModelOutcome::Scored(_) if fallback_enabled => FallbackDecision::UseLlm,
        ModelOutcome::Scored(_) => FallbackDecision::Accept,
        ModelOutcome::Unavailable | ModelOutcome::Failed if fallback_enabled => {
            FallbackDecision::UseLlm
        }
        ModelOutcome::Unavailable | ModelOutcome::Failed => FallbackDecision::Unknown,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Dispatches crops to a strategy and always yields exactly one record
pub struct ClassificationRouter {
    registry: Arc<ModelRegistry>,
    reasoning: Arc<dyn ReasoningService>,
    hub: TelemetryHub,
    config: RouterConfig,
    llm_timeout: Duration,
}

impl ClassificationRouter {
    pub fn new(
        registry: Arc<ModelRegistry>,
        reasoning: Arc<dyn ReasoningService>,
        hub: TelemetryHub,
        config: RouterConfig,
        llm_timeout_ms: u64,
    ) -> Self {
        Self {
            registry,
            reasoning,
            hub,
            config,
            llm_timeout: Duration::from_millis(llm_timeout_ms),
        }
    }

    pub fn default_strategy(&self) -> Strategy {
        self.config.default_strategy
    }

    pub fn reasoning_configured(&self) -> bool {
        self.reasoning.is_configured()
    }

    pub fn reasoning_service_name(&self) -> &str {
        self.reasoning.service_name()
    }

    /// Classify a crop. Failures degrade to an Unknown record, never an error.
    ///
    /// `strategy` and `fallback` override the configured defaults for this call.
    /// The record is counted in the hub statistics before it is returned.
    pub async fn classify(
        &self,
        crop: &InferenceImage,
        strategy: Option<Strategy>,
        fallback: Option<bool>,
    ) -> ClassificationRecord {
        let progress = Mutex::new(strategy.unwrap_or(self.config.default_strategy));
        self.classify_tracked(crop, strategy, fallback, &progress).await
    }

    /// [`classify`](Self::classify), keeping `progress` set to the strategy
    /// currently running so a caller that abandons the call knows which one
    /// it interrupted.
    pub async fn classify_tracked(
        &self,
        crop: &InferenceImage,
        strategy: Option<Strategy>,
        fallback: Option<bool>,
        progress: &Mutex<Strategy>,
    ) -> ClassificationRecord {
        let started = Instant::now();
        let strategy = strategy.unwrap_or(self.config.default_strategy);
        let fallback = fallback.unwrap_or(self.config.fallback_enabled);
        *progress.lock() = strategy;

        let record = match strategy {
            Strategy::Model => {
                self.classify_with_model(crop, fallback, started, progress)
                    .await
            }
            Strategy::Llm => self.classify_with_llm(crop, started).await,
        };

        info!(
            "Classified as {} ({:.2}) via {} in {}ms [{}]",
            record.category,
            record.confidence,
            record.strategy_used,
            record.processing_duration_ms,
            record.tracking_token
        );

        if let Err(e) = self.hub.record_classification(&record).await {
            warn!("Failed to record classification statistics: {}", e);
        }

        record
    }

    async fn classify_with_model(
        &self,
        crop: &InferenceImage,
        fallback: bool,
        started: Instant,
        progress: &Mutex<Strategy>,
    ) -> ClassificationRecord {
        let (outcome, record) = match self.run_model(crop).await {
            Ok(output) => {
                let explanation = format!(
                    "Classifier identified '{}' with confidence {:.2}",
                    output.label, output.confidence
                );
                let record = into_record(
                    RawClassification {
                        category_text: output.label.clone(),
                        item_label: output.label,
                        explanation,
                        confidence: output.confidence,
                    },
                    Strategy::Model,
                    self.config.unrecognized_penalty,
                    elapsed_ms(started),
                );
                (ModelOutcome::Scored(record.confidence), Some(record))
            }
            Err(ClassificationError::ModelUnavailable) => {
                debug!("No classifier model loaded");
                (ModelOutcome::Unavailable, None)
            }
            Err(e) => {
                warn!("Classifier model failed: {}", e);
                (ModelOutcome::Failed, None)
            }
        };

        let decision = fallback_decision(outcome, self.config.min_acceptance_confidence, fallback);
        match (decision, record) {
            (FallbackDecision::Accept, Some(record)) => record,
            (FallbackDecision::UseLlm, _) => {
                debug!("Model outcome {:?}, falling back to reasoning service", outcome);
                *progress.lock() = Strategy::Llm;
                self.classify_with_llm(crop, started).await
            }
            _ => ClassificationRecord::unknown(
                Strategy::Model,
                "Classifier model unavailable and fallback disabled",
                elapsed_ms(started),
            ),
        }
    }

    async fn run_model(&self, crop: &InferenceImage) -> Result<ClassifierOutput, ClassificationError> {
        let classifier = self
            .registry
            .classifier()
            .ok_or(ClassificationError::ModelUnavailable)?;
        let _permit = self
            .registry
            .acquire()
            .await
            .map_err(|e| ClassificationError::Inference {
                details: e.to_string(),
            })?;
        classifier.classify(crop).await
    }

    async fn classify_with_llm(&self, crop: &InferenceImage, started: Instant) -> ClassificationRecord {
        match tokio::time::timeout(self.llm_timeout, self.reasoning.classify(crop)).await {
            Ok(Ok(raw)) => into_record(
                raw,
                Strategy::Llm,
                self.config.unrecognized_penalty,
                elapsed_ms(started),
            ),
            Ok(Err(e)) => {
                let e = ClassificationError::from(e);
                warn!("{}", e);
                ClassificationRecord::unknown(
                    Strategy::Llm,
                    format!("Degraded mode: {}", e),
                    elapsed_ms(started),
                )
            }
            Err(_) => {
                let e = ClassificationError::ClassificationTimeout {
                    timeout_ms: self.llm_timeout.as_millis() as u64,
                };
                warn!("Reasoning call failed: {}", e);
                ClassificationRecord::unknown(
                    Strategy::Llm,
                    format!("Degraded mode: {}", e),
                    elapsed_ms(started),
                )
            }
        }
    }
}
