//! Dual-strategy classification of cropped items.
//!
//! The [`ClassificationRouter`] sends a crop either to the on-device
//! classifier ([`Strategy::Model`]) or to a hosted reasoning service
//! ([`Strategy::Llm`]) and normalizes whatever comes back into a
//! [`ClassificationRecord`].

pub mod llm;
pub mod normalize;
mod router;
mod types;

#[cfg(test)]
mod tests;

pub use llm::{GeminiClient, MockReasoningService, ReasoningService};
pub use normalize::{into_record, parse_category, RawClassification};
pub use router::{fallback_decision, ClassificationRouter, FallbackDecision, ModelOutcome};
pub use types::{clamp_confidence, BinColor, ClassificationRecord, Strategy, WasteCategory};
