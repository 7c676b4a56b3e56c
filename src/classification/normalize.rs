//! Mapping of free-form strategy output onto [`WasteCategory`].

use super::types::{clamp_confidence, ClassificationRecord, Strategy, WasteCategory};

/// Strategy output before normalization
#[derive(Debug, Clone, PartialEq)]
pub struct RawClassification {
    /// Category as the strategy phrased it ("Recyclable", "plastic bottle", ...)
    pub category_text: String,
    pub item_label: String,
    pub explanation: String,
    pub confidence: f32,
}

// Checked in this order: the more hazardous category wins when a label
// mentions several, and "non-recyclable" must be seen before "recyclable".
const KEYWORDS: &[(WasteCategory, &[&str])] = &[
    (
        WasteCategory::Sharp,
        &["sharp", "sharps", "needle", "syringe", "scalpel", "blade", "lancet"],
    ),
    (
        WasteCategory::Infectious,
        &[
            "infectious", "biohazard", "blood", "swab", "glove", "dressing", "bandage", "mask",
        ],
    ),
    (
        WasteCategory::Pharmaceutical,
        &[
            "pharmaceutical", "medicine", "medication", "pill", "tablet", "vial", "drug",
            "capsule", "ampoule",
        ],
    ),
    (
        WasteCategory::GeneralBiomedical,
        &[
            "general", "biomedical", "non-recyclable", "nonrecyclable", "food", "gauze",
            "cotton", "styrofoam", "ceramic", "tissue", "diaper",
        ],
    ),
    (
        WasteCategory::Recyclable,
        &[
            "recyclable", "recycle", "plastic", "bottle", "can", "metal", "aluminum",
            "aluminium", "glass", "paper", "cardboard", "box", "container", "jar", "tin",
        ],
    ),
];

fn canonical(text: &str) -> Option<WasteCategory> {
    let normalized: String = text
        .trim()
        .chars()
        .map(|c| match c {
            ' ' | '-' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect();

    WasteCategory::ALL.into_iter().find(|category| {
        normalized == category.key()
            || normalized.eq_ignore_ascii_case(category.disposal_code())
    })
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '-'))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

fn keyword_match(token: &str, keyword: &str) -> bool {
    token == keyword
        || token
            .strip_prefix(keyword)
            .map_or(false, |rest| rest == "s" || rest == "es")
}

/// Map category text onto a category; `None` when nothing matches
pub fn parse_category(text: &str) -> Option<WasteCategory> {
    if let Some(category) = canonical(text) {
        return Some(category);
    }

    let tokens: Vec<String> = tokens(text).collect();
    KEYWORDS.iter().find_map(|(category, keywords)| {
        tokens
            .iter()
            .any(|token| keywords.iter().any(|kw| keyword_match(token, kw)))
            .then_some(*category)
    })
}

/// Canonicalize strategy output into an immutable record.
///
/// Confidence is clamped before the unrecognized penalty applies, so the
/// result always stays within [0, 1].
pub fn into_record(
    raw: RawClassification,
    strategy: Strategy,
    unrecognized_penalty: f32,
    processing_duration_ms: u64,
) -> ClassificationRecord {
    let (confidence, clamped) = clamp_confidence(raw.confidence);

    let (category, confidence) = match parse_category(&raw.category_text)
        .or_else(|| parse_category(&raw.item_label))
    {
        Some(category) => (category, confidence),
        None => (WasteCategory::Unknown, confidence * unrecognized_penalty),
    };

    let item_label = if raw.item_label.trim().is_empty() {
        "Unknown Item".to_string()
    } else {
        raw.item_label
    };

    let mut record = ClassificationRecord::new(
        category,
        confidence,
        item_label,
        raw.explanation,
        strategy,
        processing_duration_ms,
    );
    record.confidence_clamped = clamped;
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(category: &str, confidence: f32) -> RawClassification {
        RawClassification {
            category_text: category.to_string(),
            item_label: String::new(),
            explanation: String::new(),
            confidence,
        }
    }

    #[test]
    fn test_canonical_names() {
        assert_eq!(parse_category("Recyclable"), Some(WasteCategory::Recyclable));
        assert_eq!(
            parse_category("General Biomedical"),
            Some(WasteCategory::GeneralBiomedical)
        );
        assert_eq!(
            parse_category("general_biomedical"),
            Some(WasteCategory::GeneralBiomedical)
        );
        assert_eq!(parse_category("SHP"), Some(WasteCategory::Sharp));
        assert_eq!(parse_category("unknown"), Some(WasteCategory::Unknown));
    }

    #[test]
    fn test_keyword_tables() {
        assert_eq!(parse_category("plastic bottle"), Some(WasteCategory::Recyclable));
        assert_eq!(parse_category("Aluminum cans"), Some(WasteCategory::Recyclable));
        assert_eq!(parse_category("Non-Recyclable"), Some(WasteCategory::GeneralBiomedical));
        assert_eq!(parse_category("used syringe"), Some(WasteCategory::Sharp));
        assert_eq!(parse_category("medicine bottle"), Some(WasteCategory::Pharmaceutical));
        assert_eq!(parse_category("latex gloves"), Some(WasteCategory::Infectious));
        assert_eq!(parse_category("scanner"), None);
        assert_eq!(parse_category(""), None);
    }

    #[test]
    fn test_unrecognized_text_is_penalized() {
        let record = into_record(raw("banana phone", 0.8), Strategy::Model, 0.5, 3);
        assert_eq!(record.category, WasteCategory::Unknown);
        assert!((record.confidence - 0.4).abs() < 1e-6);
        assert!(!record.confidence_clamped);
        assert_eq!(record.item_label, "Unknown Item");
        assert_eq!(record.disposal_code, "UNK");
    }

    #[test]
    fn test_out_of_range_confidence_is_clamped() {
        let high = into_record(raw("Recyclable", 1.7), Strategy::Llm, 0.5, 0);
        assert_eq!(high.confidence, 1.0);
        assert!(high.confidence_clamped);

        let nan = into_record(raw("Sharp", f32::NAN), Strategy::Model, 0.5, 0);
        assert_eq!(nan.confidence, 0.0);
        assert!(nan.confidence_clamped);

        let negative = into_record(raw("nothing known", -2.0), Strategy::Model, 0.5, 0);
        assert_eq!(negative.category, WasteCategory::Unknown);
        assert_eq!(negative.confidence, 0.0);
        assert!(negative.confidence_clamped);
    }

    #[test]
    fn test_item_label_backs_up_category_text() {
        let mut input = raw("", 0.9);
        input.item_label = "Glass jar".to_string();
        let record = into_record(input, Strategy::Llm, 0.5, 0);
        assert_eq!(record.category, WasteCategory::Recyclable);
        assert_eq!(record.item_label, "Glass jar");
    }
}
