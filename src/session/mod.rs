//! Scan sessions: one timed detect, classify and display cycle per client.

mod clock;
mod machine;
mod pipeline;
#[cfg(test)]
mod tests;

pub use clock::{Clock, ManualClock, SystemClock};
pub use machine::{FrameRejection, FrameTicket, Phase, ScanSession, SessionState, SessionTimings};
pub use pipeline::{Inspection, ScanOutcome, ScanPipeline, SessionManager};
