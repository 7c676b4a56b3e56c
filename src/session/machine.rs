use super::clock::Clock;
use crate::classification::ClassificationRecord;
use crate::config::SessionConfig;
use crate::detector::PresenceResult;
use crate::error::SessionError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Phase of one scan cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Scanning,
    PresenceConfirmed,
    Classifying,
    ResultReady,
    Cooldown,
}

impl Phase {
    fn can_enter(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Idle, Scanning)
                | (Scanning, PresenceConfirmed)
                | (PresenceConfirmed, Classifying)
                | (PresenceConfirmed, Scanning)
                | (Classifying, ResultReady)
                | (Classifying, Scanning)
                | (ResultReady, Cooldown)
                | (Cooldown, Scanning)
                | (_, Idle)
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Scanning => "scanning",
            Phase::PresenceConfirmed => "presence_confirmed",
            Phase::Classifying => "classifying",
            Phase::ResultReady => "result_ready",
            Phase::Cooldown => "cooldown",
        };
        f.write_str(name)
    }
}

/// Session timer settings
#[derive(Debug, Clone, Copy)]
pub struct SessionTimings {
    pub startup_delay: Duration,
    pub poll_interval: Duration,
    pub display_duration: Duration,
    pub reset_delay: Duration,
    pub presence_confidence_threshold: f32,
}

impl From<&SessionConfig> for SessionTimings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            startup_delay: Duration::from_millis(config.startup_delay_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            display_duration: Duration::from_millis(config.display_duration_ms),
            reset_delay: Duration::from_millis(config.reset_delay_ms),
            presence_confidence_threshold: config.presence_confidence_threshold,
        }
    }
}

/// Why a submitted frame was not processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameRejection {
    /// Another frame of this session is still being processed
    Busy,
    /// The session has not finished its startup delay
    Starting,
    /// A result is on display or the reset delay is running
    Cooldown,
    /// Submitted sooner than the poll interval allows
    Throttled,
    /// Scanning was stopped
    Stopped,
}

impl FrameRejection {
    pub fn reason(self) -> &'static str {
        match self {
            FrameRejection::Busy => "busy",
            FrameRejection::Starting => "starting",
            FrameRejection::Cooldown => "cooldown",
            FrameRejection::Throttled => "throttled",
            FrameRejection::Stopped => "stopped",
        }
    }
}

/// Claim on the session held by one accepted frame.
///
/// Stopping or restarting the session invalidates every outstanding ticket,
/// so a cycle that outlives its claim can no longer move the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTicket(u64);

/// Externally visible session state
#[derive(Debug, Clone, Serialize)]
pub struct SessionState {
    pub session_id: String,
    pub phase: Phase,
    pub active_since: DateTime<Utc>,
    pub last_result: Option<ClassificationRecord>,
    /// Whether the last result is still within its display period
    pub result_visible: bool,
    pub frame_in_flight: bool,
}

/// Timed scan-cycle state machine for one client.
///
/// Time-driven transitions (startup delay, cooldown) are applied lazily
/// whenever the machine is consulted, against the injected [`Clock`].
pub struct ScanSession {
    id: String,
    clock: Arc<dyn Clock>,
    timings: SessionTimings,
    phase: Phase,
    phase_entered: Instant,
    active_since: DateTime<Utc>,
    stopped: bool,
    claim: Option<FrameTicket>,
    next_ticket: u64,
    last_frame_at: Option<Instant>,
    last_result: Option<ClassificationRecord>,
}

impl ScanSession {
    pub fn new(id: impl Into<String>, timings: SessionTimings, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            id: id.into(),
            clock,
            timings,
            phase: Phase::Idle,
            phase_entered: now,
            active_since: Utc::now(),
            stopped: false,
            claim: None,
            next_ticket: 0,
            last_frame_at: None,
            last_result: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phase(&mut self) -> Phase {
        self.tick();
        self.phase
    }

    fn transition(&mut self, next: Phase) -> Result<(), SessionError> {
        if !self.phase.can_enter(next) {
            return Err(SessionError::InvalidTransition {
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }
        debug!("Session {}: {} -> {}", self.id, self.phase, next);
        self.phase = next;
        self.phase_entered = self.clock.now();
        if next == Phase::Scanning {
            self.last_frame_at = None;
        }
        Ok(())
    }

    /// Apply any transitions whose timers have run out
    pub fn tick(&mut self) {
        let elapsed = self.clock.now().saturating_duration_since(self.phase_entered);
        match self.phase {
            Phase::Idle if !self.stopped && elapsed >= self.timings.startup_delay => {
                self.active_since = Utc::now();
                let _ = self.transition(Phase::Scanning);
            }
            Phase::Cooldown
                if elapsed >= self.timings.display_duration + self.timings.reset_delay =>
            {
                let _ = self.transition(Phase::Scanning);
            }
            _ => {}
        }
    }

    fn check_claim(&self, ticket: FrameTicket) -> Result<(), SessionError> {
        if self.claim == Some(ticket) {
            Ok(())
        } else {
            Err(SessionError::Cancelled {
                session_id: self.id.clone(),
            })
        }
    }

    /// Claim the session for a new frame
    pub fn begin_frame(&mut self) -> Result<FrameTicket, FrameRejection> {
        self.tick();
        if self.claim.is_some() {
            return Err(FrameRejection::Busy);
        }

        match self.phase {
            Phase::Scanning => {}
            Phase::Idle if self.stopped => return Err(FrameRejection::Stopped),
            Phase::Idle => return Err(FrameRejection::Starting),
            Phase::Cooldown | Phase::ResultReady => return Err(FrameRejection::Cooldown),
            Phase::PresenceConfirmed | Phase::Classifying => return Err(FrameRejection::Busy),
        }

        let now = self.clock.now();
        if let Some(last) = self.last_frame_at {
            if now.saturating_duration_since(last) < self.timings.poll_interval {
                return Err(FrameRejection::Throttled);
            }
        }

        let ticket = FrameTicket(self.next_ticket);
        self.next_ticket += 1;
        self.claim = Some(ticket);
        self.last_frame_at = Some(now);
        Ok(ticket)
    }

    /// Feed the presence result of the claimed frame. Returns whether presence
    /// was confirmed; if not, the frame is released.
    pub fn presence(
        &mut self,
        ticket: FrameTicket,
        result: &PresenceResult,
    ) -> Result<bool, SessionError> {
        self.check_claim(ticket)?;
        if self.phase != Phase::Scanning {
            return Err(SessionError::InvalidTransition {
                from: self.phase.to_string(),
                to: Phase::PresenceConfirmed.to_string(),
            });
        }

        if result.object_present
            && result.confidence >= self.timings.presence_confidence_threshold
        {
            self.transition(Phase::PresenceConfirmed)?;
            Ok(true)
        } else {
            self.claim = None;
            Ok(false)
        }
    }

    /// The confirmed region could not be cropped
    pub fn invalid_region(&mut self, ticket: FrameTicket) -> Result<(), SessionError> {
        self.check_claim(ticket)?;
        if self.phase != Phase::PresenceConfirmed {
            return Err(SessionError::InvalidTransition {
                from: self.phase.to_string(),
                to: Phase::Scanning.to_string(),
            });
        }
        self.claim = None;
        self.transition(Phase::Scanning)
    }

    pub fn begin_classifying(&mut self, ticket: FrameTicket) -> Result<(), SessionError> {
        self.check_claim(ticket)?;
        self.transition(Phase::Classifying)
    }

    /// Store the cycle's record and move on to the display period
    pub fn complete(
        &mut self,
        ticket: FrameTicket,
        record: ClassificationRecord,
    ) -> Result<(), SessionError> {
        self.check_claim(ticket)?;
        self.transition(Phase::ResultReady)?;
        self.last_result = Some(record);
        self.claim = None;
        self.transition(Phase::Cooldown)
    }

    /// Release the claimed frame after a failure outside the cycle's control.
    /// A ticket that no longer holds the claim leaves the session untouched.
    pub fn abort_frame(&mut self, ticket: FrameTicket) {
        if self.claim != Some(ticket) {
            return;
        }
        self.claim = None;
        if matches!(self.phase, Phase::PresenceConfirmed | Phase::Classifying) {
            let _ = self.transition(Phase::Scanning);
        }
    }

    /// Stop scanning; frames are refused until [`restart`](Self::restart)
    pub fn stop(&mut self) {
        self.stopped = true;
        self.claim = None;
        let _ = self.transition(Phase::Idle);
    }

    /// Return to Idle and run the startup delay again
    pub fn restart(&mut self) {
        self.stopped = false;
        self.claim = None;
        let _ = self.transition(Phase::Idle);
    }

    pub fn snapshot(&mut self) -> SessionState {
        self.tick();
        let elapsed = self.clock.now().saturating_duration_since(self.phase_entered);
        SessionState {
            session_id: self.id.clone(),
            phase: self.phase,
            active_since: self.active_since,
            last_result: self.last_result.clone(),
            result_visible: self.phase == Phase::Cooldown
                && elapsed < self.timings.display_duration,
            frame_in_flight: self.claim.is_some(),
        }
    }
}
