use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Disposal category of a scanned item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WasteCategory {
    Recyclable,
    GeneralBiomedical,
    Infectious,
    Sharp,
    Pharmaceutical,
    Unknown,
}

impl WasteCategory {
    pub const ALL: [WasteCategory; 6] = [
        WasteCategory::Recyclable,
        WasteCategory::GeneralBiomedical,
        WasteCategory::Infectious,
        WasteCategory::Sharp,
        WasteCategory::Pharmaceutical,
        WasteCategory::Unknown,
    ];

    pub fn display_name(self) -> &'static str {
        match self {
            WasteCategory::Recyclable => "Recyclable",
            WasteCategory::GeneralBiomedical => "General Biomedical",
            WasteCategory::Infectious => "Infectious",
            WasteCategory::Sharp => "Sharp",
            WasteCategory::Pharmaceutical => "Pharmaceutical",
            WasteCategory::Unknown => "Unknown",
        }
    }

    /// Serialized name, also used as the statistics key
    pub fn key(self) -> &'static str {
        match self {
            WasteCategory::Recyclable => "recyclable",
            WasteCategory::GeneralBiomedical => "general_biomedical",
            WasteCategory::Infectious => "infectious",
            WasteCategory::Sharp => "sharp",
            WasteCategory::Pharmaceutical => "pharmaceutical",
            WasteCategory::Unknown => "unknown",
        }
    }

    /// Color of the bin the item goes into
    pub fn bin_color(self) -> BinColor {
        match self {
            WasteCategory::Recyclable => BinColor::Green,
            WasteCategory::GeneralBiomedical => BinColor::Black,
            WasteCategory::Infectious => BinColor::Yellow,
            WasteCategory::Sharp => BinColor::White,
            WasteCategory::Pharmaceutical => BinColor::Blue,
            WasteCategory::Unknown => BinColor::Black,
        }
    }

    pub fn disposal_code(self) -> &'static str {
        match self {
            WasteCategory::Recyclable => "REC",
            WasteCategory::GeneralBiomedical => "GEN",
            WasteCategory::Infectious => "INF",
            WasteCategory::Sharp => "SHP",
            WasteCategory::Pharmaceutical => "PHA",
            WasteCategory::Unknown => "UNK",
        }
    }
}

impl fmt::Display for WasteCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinColor {
    Green,
    Black,
    Yellow,
    White,
    Blue,
}

/// Classification strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Local discriminative classifier
    #[serde(alias = "Model", alias = "MODEL")]
    Model,
    /// Hosted generative reasoning service
    #[serde(alias = "Llm", alias = "LLM")]
    Llm,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Model => f.write_str("model"),
            Strategy::Llm => f.write_str("llm"),
        }
    }
}

/// Canonical result of one classification. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRecord {
    pub category: WasteCategory,
    pub bin_color: BinColor,
    pub disposal_code: String,
    /// Always within [0, 1]
    pub confidence: f32,
    /// Set when the strategy reported a confidence outside [0, 1] or NaN
    pub confidence_clamped: bool,
    pub item_label: String,
    pub explanation: String,
    pub strategy_used: Strategy,
    pub timestamp: DateTime<Utc>,
    pub processing_duration_ms: u64,
    pub tracking_token: Uuid,
}

impl ClassificationRecord {
    pub fn new(
        category: WasteCategory,
        raw_confidence: f32,
        item_label: impl Into<String>,
        explanation: impl Into<String>,
        strategy_used: Strategy,
        processing_duration_ms: u64,
    ) -> Self {
        let (confidence, confidence_clamped) = clamp_confidence(raw_confidence);
        Self {
            category,
            bin_color: category.bin_color(),
            disposal_code: category.disposal_code().to_string(),
            confidence,
            confidence_clamped,
            item_label: item_label.into(),
            explanation: explanation.into(),
            strategy_used,
            timestamp: Utc::now(),
            processing_duration_ms,
            tracking_token: Uuid::new_v4(),
        }
    }

    /// Zero-confidence Unknown record for a degraded cycle
    pub fn unknown(
        strategy_used: Strategy,
        explanation: impl Into<String>,
        processing_duration_ms: u64,
    ) -> Self {
        Self::new(
            WasteCategory::Unknown,
            0.0,
            "Unknown Item",
            explanation,
            strategy_used,
            processing_duration_ms,
        )
    }
}

/// Clamp into [0, 1]; NaN becomes 0. The flag reports whether anything changed.
pub fn clamp_confidence(raw: f32) -> (f32, bool) {
    if raw.is_nan() {
        (0.0, true)
    } else if raw < 0.0 {
        (0.0, true)
    } else if raw > 1.0 {
        (1.0, true)
    } else {
        (raw, false)
    }
}
