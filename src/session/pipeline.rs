use super::clock::Clock;
use super::machine::{
    FrameRejection, FrameTicket, Phase, ScanSession, SessionState, SessionTimings,
};
use crate::classification::{ClassificationRecord, ClassificationRouter, ReasoningService, Strategy};
use crate::config::SortyxConfig;
use crate::detector::{PresenceDetector, PresenceResult};
use crate::error::{
    ClassificationError, DetectionError, FrameError, RegionError, Result, SessionError,
};
use crate::extractor::{CroppedRegion, RegionExtractor};
use crate::frame::{Frame, Rect};
use crate::hub::TelemetryHub;
use crate::models::{InferenceImage, ModelRegistry};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What happened to one submitted frame
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScanOutcome {
    /// The session did not accept the frame
    Rejected { reason: FrameRejection, phase: Phase },
    /// Detection ran but no object in hand was confirmed
    Presence { presence: PresenceResult },
    /// Presence was confirmed but the region could not be cropped
    RegionRejected {
        presence: PresenceResult,
        details: String,
    },
    /// A full cycle produced a record
    Classified {
        presence: PresenceResult,
        region: Rect,
        record: ClassificationRecord,
    },
}

/// A frame as submitted: already decoded, or still a base64 payload
enum FrameInput {
    Decoded(Frame),
    Encoded(String),
}

/// Presence result plus the crop, when an object was found
#[derive(Debug, Clone)]
pub struct Inspection {
    pub presence: PresenceResult,
    pub crop: Option<CroppedRegion>,
}

/// The detect, crop, classify and publish stages shared by every session
pub struct ScanPipeline {
    registry: Arc<ModelRegistry>,
    detector: PresenceDetector,
    extractor: RegionExtractor,
    router: ClassificationRouter,
    hub: TelemetryHub,
    max_frame_dimension: u32,
    presence_threshold: f32,
    classifying_timeout: Duration,
}

impl ScanPipeline {
    pub fn new(
        config: &SortyxConfig,
        registry: Arc<ModelRegistry>,
        reasoning: Arc<dyn ReasoningService>,
        hub: TelemetryHub,
    ) -> Self {
        let detector = PresenceDetector::new(
            Arc::clone(&registry),
            config.detector.clone(),
            config.extractor.jpeg_quality,
        );
        let router = ClassificationRouter::new(
            Arc::clone(&registry),
            reasoning,
            hub.clone(),
            config.router.clone(),
            config.llm.timeout_ms,
        );

        Self {
            registry,
            detector,
            extractor: RegionExtractor::new(config.extractor.clone()),
            router,
            hub,
            max_frame_dimension: config.detector.max_frame_dimension,
            presence_threshold: config.session.presence_confidence_threshold,
            classifying_timeout: Duration::from_millis(config.session.classifying_timeout_ms),
        }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &ClassificationRouter {
        &self.router
    }

    pub fn hub(&self) -> &TelemetryHub {
        &self.hub
    }

    /// New scans need the pose and detection models
    pub fn scans_ready(&self) -> bool {
        self.detector.is_ready()
    }

    /// Decode a base64 or data-URL image into a normalized frame
    pub async fn decode_frame(&self, payload: String) -> std::result::Result<Frame, FrameError> {
        let max_dimension = self.max_frame_dimension;
        tokio::task::spawn_blocking(move || Frame::from_base64(&payload, max_dimension))
            .await
            .map_err(|e| FrameError::DecodeFailed {
                details: format!("frame decoding task failed: {}", e),
            })?
    }

    async fn extract(
        &self,
        frame: &Frame,
        region: Rect,
    ) -> std::result::Result<CroppedRegion, RegionError> {
        let extractor = self.extractor.clone();
        let frame = frame.clone();
        tokio::task::spawn_blocking(move || extractor.extract(&frame, &region))
            .await
            .map_err(|e| {
                RegionError::Encode(FrameError::EncodeFailed {
                    details: format!("crop task failed: {}", e),
                })
            })?
    }

    /// Presence check plus crop, without any session or classification
    pub async fn inspect(&self, frame: &Frame) -> std::result::Result<Inspection, DetectionError> {
        let presence = self.detector.detect(frame).await?;
        let crop = match presence.bounding_region {
            Some(region) if presence.object_present => {
                match self.extract(frame, region).await {
                    Ok(crop) => Some(crop),
                    Err(e) => {
                        debug!("Crop rejected: {}", e);
                        None
                    }
                }
            }
            _ => None,
        };
        Ok(Inspection { presence, crop })
    }

    fn confirmed(&self, presence: &PresenceResult) -> bool {
        presence.object_present && presence.confidence >= self.presence_threshold
    }

    async fn crop(
        &self,
        frame: &Frame,
        presence: &PresenceResult,
    ) -> std::result::Result<CroppedRegion, RegionError> {
        match presence.bounding_region {
            Some(region) => self.extract(frame, region).await,
            None => Err(RegionError::InvalidRegion {
                details: "presence confirmed without a bounding region".to_string(),
            }),
        }
    }

    /// Classify a crop within the Classifying time bound.
    ///
    /// A record is produced even when the bound is hit; it names the strategy
    /// that was running at that moment.
    pub async fn classify_crop(
        &self,
        crop: &InferenceImage,
        strategy: Option<Strategy>,
        fallback: Option<bool>,
    ) -> ClassificationRecord {
        let progress = Mutex::new(strategy.unwrap_or(self.router.default_strategy()));
        let classification = self
            .router
            .classify_tracked(crop, strategy, fallback, &progress);
        match tokio::time::timeout(self.classifying_timeout, classification).await {
            Ok(record) => record,
            Err(_) => {
                let interrupted = *progress.lock();
                let timeout_ms = self.classifying_timeout.as_millis() as u64;
                let e = ClassificationError::ClassificationTimeout { timeout_ms };
                warn!("{} during {} classification", e, interrupted);
                let record = ClassificationRecord::unknown(
                    interrupted,
                    format!("Degraded mode: {} during {} classification", e, interrupted),
                    timeout_ms,
                );
                if let Err(e) = self.hub.record_classification(&record).await {
                    warn!("Failed to record classification statistics: {}", e);
                }
                record
            }
        }
    }

    /// Broadcast a record to observers
    pub async fn publish(&self, session_id: Option<String>, record: &ClassificationRecord) {
        if let Err(e) = self.hub.publish_classification(session_id, record.clone()).await {
            warn!("Failed to publish classification: {}", e);
        }
    }

    /// One detect, crop and classify pass outside any session
    pub async fn scan_once(
        &self,
        frame: &Frame,
        strategy: Option<Strategy>,
        fallback: Option<bool>,
    ) -> Result<ScanOutcome> {
        let presence = self.detector.detect(frame).await?;
        if !self.confirmed(&presence) {
            return Ok(ScanOutcome::Presence { presence });
        }

        let crop = match self.crop(frame, &presence).await {
            Ok(crop) => crop,
            Err(e) => {
                return Ok(ScanOutcome::RegionRejected {
                    presence,
                    details: e.to_string(),
                })
            }
        };

        let record = self.classify_crop(&crop.image, strategy, fallback).await;
        self.publish(None, &record).await;
        Ok(ScanOutcome::Classified {
            presence,
            region: crop.region,
            record,
        })
    }

    async fn run_cycle(
        &self,
        session: &Mutex<ScanSession>,
        session_id: &str,
        ticket: FrameTicket,
        input: FrameInput,
        strategy: Option<Strategy>,
        fallback: Option<bool>,
    ) -> Result<ScanOutcome> {
        let frame = match input {
            FrameInput::Decoded(frame) => frame,
            FrameInput::Encoded(payload) => match self.decode_frame(payload).await {
                Ok(frame) => frame,
                Err(e) => {
                    session.lock().abort_frame(ticket);
                    return Err(e.into());
                }
            },
        };

        let presence = match self.detector.detect(&frame).await {
            Ok(presence) => presence,
            Err(e) => {
                session.lock().abort_frame(ticket);
                return Err(e.into());
            }
        };

        let confirmed = session.lock().presence(ticket, &presence)?;
        if !confirmed {
            return Ok(ScanOutcome::Presence { presence });
        }

        let crop = match self.crop(&frame, &presence).await {
            Ok(crop) => crop,
            Err(e) => {
                debug!("Session {}: {}", session_id, e);
                session.lock().invalid_region(ticket)?;
                return Ok(ScanOutcome::RegionRejected {
                    presence,
                    details: e.to_string(),
                });
            }
        };

        session.lock().begin_classifying(ticket)?;
        let record = self.classify_crop(&crop.image, strategy, fallback).await;
        session.lock().complete(ticket, record.clone())?;
        self.publish(Some(session_id.to_string()), &record).await;

        Ok(ScanOutcome::Classified {
            presence,
            region: crop.region,
            record,
        })
    }
}

#[derive(Clone)]
struct SessionSlot {
    machine: Arc<Mutex<ScanSession>>,
    cancel: CancellationToken,
}

impl SessionSlot {
    /// Cancel whatever frame is running and arm a token for the next one
    fn renew_cancel(&mut self) {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
    }
}

/// Registry of independent scan sessions
pub struct SessionManager {
    pipeline: Arc<ScanPipeline>,
    clock: Arc<dyn Clock>,
    timings: SessionTimings,
    sessions: Mutex<HashMap<String, SessionSlot>>,
}

impl SessionManager {
    pub fn new(pipeline: Arc<ScanPipeline>, config: &SortyxConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            pipeline,
            clock,
            timings: SessionTimings::from(&config.session),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn pipeline(&self) -> &Arc<ScanPipeline> {
        &self.pipeline
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    fn slot(&self, session_id: &str) -> std::result::Result<SessionSlot, SessionError> {
        self.sessions
            .lock()
            .get(session_id)
            .cloned()
            .ok_or_else(|| not_found(session_id))
    }

    /// Start a session, or restart an existing one with the same id
    pub fn start(&self, session_id: Option<String>) -> SessionState {
        let id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut sessions = self.sessions.lock();

        let mut created = false;
        let slot = sessions.entry(id.clone()).or_insert_with(|| {
            created = true;
            info!("Scan session {} started", id);
            SessionSlot {
                machine: Arc::new(Mutex::new(ScanSession::new(
                    id.clone(),
                    self.timings,
                    Arc::clone(&self.clock),
                ))),
                cancel: CancellationToken::new(),
            }
        });

        if !created {
            debug!("Scan session {} restarted", id);
            slot.renew_cancel();
            slot.machine.lock().restart();
        }
        let state = slot.machine.lock().snapshot();
        state
    }

    /// Stop scanning but keep the session. A frame still in flight is cancelled.
    pub fn stop(&self, session_id: &str) -> std::result::Result<SessionState, SessionError> {
        let mut sessions = self.sessions.lock();
        let slot = sessions
            .get_mut(session_id)
            .ok_or_else(|| not_found(session_id))?;
        slot.renew_cancel();
        let mut machine = slot.machine.lock();
        machine.stop();
        Ok(machine.snapshot())
    }

    /// End a session and cancel any frame it has in flight
    pub fn end(&self, session_id: &str) -> std::result::Result<(), SessionError> {
        let slot = self
            .sessions
            .lock()
            .remove(session_id)
            .ok_or_else(|| not_found(session_id))?;
        slot.cancel.cancel();
        info!("Scan session {} ended", session_id);
        Ok(())
    }

    pub fn state(&self, session_id: &str) -> std::result::Result<SessionState, SessionError> {
        let slot = self.slot(session_id)?;
        let state = slot.machine.lock().snapshot();
        Ok(state)
    }

    /// Run one frame through the session's scan cycle
    pub async fn submit_frame(
        &self,
        session_id: &str,
        frame: Frame,
        strategy: Option<Strategy>,
        fallback: Option<bool>,
    ) -> Result<ScanOutcome> {
        self.submit(session_id, FrameInput::Decoded(frame), strategy, fallback)
            .await
    }

    /// Like [`submit_frame`](Self::submit_frame) for a base64 payload. The
    /// payload is only decoded once the session has accepted the frame.
    pub async fn submit_payload(
        &self,
        session_id: &str,
        payload: String,
        strategy: Option<Strategy>,
        fallback: Option<bool>,
    ) -> Result<ScanOutcome> {
        self.submit(session_id, FrameInput::Encoded(payload), strategy, fallback)
            .await
    }

    async fn submit(
        &self,
        session_id: &str,
        input: FrameInput,
        strategy: Option<Strategy>,
        fallback: Option<bool>,
    ) -> Result<ScanOutcome> {
        if !self.sessions.lock().contains_key(session_id) {
            return Err(not_found(session_id).into());
        }
        if !self.pipeline.scans_ready() {
            return Err(DetectionError::ModelUnavailable {
                model: "pose/detection".to_string(),
            }
            .into());
        }

        // Claim under the map lock so a concurrent stop or restart either
        // precedes the claim or cancels it.
        let (slot, claimed) = {
            let sessions = self.sessions.lock();
            let slot = sessions
                .get(session_id)
                .cloned()
                .ok_or_else(|| not_found(session_id))?;
            let claimed = slot.machine.lock().begin_frame();
            (slot, claimed)
        };

        let ticket = match claimed {
            Ok(ticket) => ticket,
            Err(reason) => {
                let phase = slot.machine.lock().phase();
                debug!("Session {} rejected frame: {}", session_id, reason.reason());
                return Ok(ScanOutcome::Rejected { reason, phase });
            }
        };

        let cycle = self.pipeline.run_cycle(
            &slot.machine,
            session_id,
            ticket,
            input,
            strategy,
            fallback,
        );

        tokio::select! {
            biased;
            _ = slot.cancel.cancelled() => {
                slot.machine.lock().abort_frame(ticket);
                Err(SessionError::Cancelled {
                    session_id: session_id.to_string(),
                }
                .into())
            }
            outcome = cycle => outcome,
        }
    }

    /// Cancel every session
    pub fn shutdown(&self) {
        let sessions: Vec<SessionSlot> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        for slot in &sessions {
            slot.cancel.cancel();
        }
        if !sessions.is_empty() {
            info!("Cancelled {} scan session(s)", sessions.len());
        }
    }
}

fn not_found(session_id: &str) -> SessionError {
    SessionError::NotFound {
        session_id: session_id.to_string(),
    }
}
