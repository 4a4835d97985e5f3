use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of operator correction, as tagged by the feedback parser.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionType {
    CompanyMatch,
    ProductMatch,
    Quantity,
    Price,
    Confirm,
    Reject,
    Clarify,
}

impl CorrectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CompanyMatch => "company_match",
            Self::ProductMatch => "product_match",
            Self::Quantity => "quantity",
            Self::Price => "price",
            Self::Confirm => "confirm",
            Self::Reject => "reject",
            Self::Clarify => "clarify",
        }
    }
}

/// Parsed form of a free-text correction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedCorrection {
    #[serde(rename = "type")]
    pub correction_type: CorrectionType,
    /// Field-specific payload (e.g. `{ "company_name": "..." }` or
    /// `{ "line_index": 1, "product_code": "..." }`).
    pub payload: serde_json::Value,
    pub confidence: f32,
    /// Clarification question when the parser could not commit.
    #[serde(default)]
    pub question: Option<String>,
}

/// A stored operator correction. Always references an existing
/// ProcessingResult by `order_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Correction {
    pub correction_id: Uuid,
    pub order_id: String,
    pub user_text: String,
    pub parsed: ParsedCorrection,
    pub created_at: NaiveDateTime,
    pub applied: bool,
}

/// A labeled training example derived from a correction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingExample {
    /// Stable signature naming the extraction aspect this example trains
    /// (e.g. `customer_identity`, `line_item_product`).
    pub signature: String,
    /// The cleaned message text the original extraction saw.
    pub input: String,
    /// The corrected extraction: original fields with only the corrected
    /// ones replaced.
    pub expected_output: serde_json::Value,
    pub weight: f32,
    pub derived_from_correction_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correction_type_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&CorrectionType::CompanyMatch).unwrap(),
            "\"company_match\""
        );
    }

    #[test]
    fn parsed_correction_type_field_named_type() {
        let p = ParsedCorrection {
            correction_type: CorrectionType::Quantity,
            payload: serde_json::json!({"line_index": 0, "quantity": 20}),
            confidence: 0.9,
            question: None,
        };
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.contains("\"type\":\"quantity\""));
    }
}
