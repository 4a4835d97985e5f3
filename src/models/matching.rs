use serde::{Deserialize, Serialize};

/// How a line item was matched to a product.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    ExactCode,
    Token,
    #[serde(rename = "semantic+token")]
    SemanticToken,
    Confirmer,
    Unmatched,
}

/// One scored product candidate for a line item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub product_id: i64,
    pub score: f32,
    pub explain: String,
}

/// Match record for one line item, attached by index identity.
///
/// Invariant: when `chosen_product_id` is set, either
/// `confidence >= auto_threshold` or `requires_review` is true.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItemMatch {
    pub line_index: usize,
    pub candidates: Vec<Candidate>,
    pub chosen_product_id: Option<i64>,
    pub confidence: f32,
    pub method: MatchMethod,
    pub requires_review: bool,
}

impl LineItemMatch {
    /// An empty candidate set is a valid outcome, not an error.
    pub fn unmatched(line_index: usize) -> Self {
        Self {
            line_index,
            candidates: Vec::new(),
            chosen_product_id: None,
            confidence: 0.0,
            method: MatchMethod::Unmatched,
            requires_review: true,
        }
    }
}

/// Resolution of the extracted customer against the local catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomerMatch {
    pub customer_id: Option<i64>,
    pub matched_name: Option<String>,
    pub confidence: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_serialization_forms() {
        assert_eq!(
            serde_json::to_string(&MatchMethod::ExactCode).unwrap(),
            "\"exact_code\""
        );
        assert_eq!(
            serde_json::to_string(&MatchMethod::SemanticToken).unwrap(),
            "\"semantic+token\""
        );
        assert_eq!(
            serde_json::to_string(&MatchMethod::Unmatched).unwrap(),
            "\"unmatched\""
        );
    }

    #[test]
    fn unmatched_requires_review() {
        let m = LineItemMatch::unmatched(3);
        assert_eq!(m.line_index, 3);
        assert!(m.candidates.is_empty());
        assert!(m.chosen_product_id.is_none());
        assert!(m.requires_review);
        assert_eq!(m.method, MatchMethod::Unmatched);
    }
}
