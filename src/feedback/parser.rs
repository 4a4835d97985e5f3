//! LLM parsing of free-text operator corrections into tagged records.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::llm::{LlmClient, LlmParams};
use crate::models::{CorrectionType, ParsedCorrection, ProcessingResult};

use super::FeedbackError;

pub struct FeedbackParser {
    llm: Arc<dyn LlmClient>,
}

impl FeedbackParser {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Parse one correction against the result it refers to.
    pub fn parse(
        &self,
        original: &ProcessingResult,
        user_text: &str,
    ) -> Result<ParsedCorrection, FeedbackError> {
        let schema = json!({
            "type": "object",
            "properties": {
                "type": {
                    "type": "string",
                    "enum": ["company_match", "product_match", "quantity", "price", "confirm", "reject", "clarify"]
                },
                "payload": { "type": "object" },
                "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
                "question": { "type": ["string", "null"] }
            },
            "required": ["type", "payload", "confidence"]
        });

        let context = json!({
            "order_id": original.order_id,
            "customer": original.extraction.customer,
            "line_items": original.extraction.line_items,
            "matches": original.matches.iter().map(|m| json!({
                "line_index": m.line_index,
                "chosen_product_id": m.chosen_product_id,
            })).collect::<Vec<_>>(),
        });

        let prompt = format!(
            "An operator replied to this processed order:\n{context}\n\n\
Operator message:\n{user_text}\n\n\
Classify the correction. Types:\n\
- company_match: payload {{\"company_name\": string}}\n\
- product_match: payload {{\"line_index\": int, \"product_code\": string}}\n\
- quantity: payload {{\"line_index\": int, \"quantity\": number}}\n\
- price: payload {{\"line_index\": int, \"unit_price\": number}}\n\
- confirm: payload {{}} — the operator approves the result\n\
- reject: payload {{\"reason\": string}} — the whole result is wrong\n\
- clarify: payload {{}} and set question — you cannot tell what to change\n\
Return JSON."
        );

        let response = self
            .llm
            .complete(&prompt, &schema, &LlmParams::default())?;
        decode_parsed(&response)
    }
}

fn decode_parsed(response: &Value) -> Result<ParsedCorrection, FeedbackError> {
    let correction_type = match response.get("type").and_then(Value::as_str) {
        Some("company_match") => CorrectionType::CompanyMatch,
        Some("product_match") => CorrectionType::ProductMatch,
        Some("quantity") => CorrectionType::Quantity,
        Some("price") => CorrectionType::Price,
        Some("confirm") => CorrectionType::Confirm,
        Some("reject") => CorrectionType::Reject,
        Some("clarify") => CorrectionType::Clarify,
        other => {
            return Err(FeedbackError::Parse(format!(
                "unknown correction type {other:?}"
            )))
        }
    };

    Ok(ParsedCorrection {
        correction_type,
        payload: response.get("payload").cloned().unwrap_or(json!({})),
        confidence: response
            .get("confidence")
            .and_then(Value::as_f64)
            .map(|c| c.clamp(0.0, 1.0) as f32)
            .unwrap_or(0.0),
        question: response
            .get("question")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;
    use crate::models::{
        CustomerMatch, ExtractedCustomer, Extraction, IntentType, ProcessingStatus,
    };

    fn original() -> ProcessingResult {
        ProcessingResult {
            message_id: "msg-1".into(),
            order_id: "ORDER_1_x".into(),
            extraction: Extraction {
                intent_type: IntentType::OrderInquiry,
                intent_confidence: 0.9,
                customer: ExtractedCustomer {
                    name: Some("SDS GmbH".into()),
                    ..Default::default()
                },
                line_items: vec![],
                order_ref: None,
                notes: None,
            },
            matches: vec![],
            customer_match: CustomerMatch::default(),
            erp_verification: None,
            order: None,
            created_at: chrono::Utc::now().naive_utc(),
            status: ProcessingStatus::Ok,
        }
    }

    #[test]
    fn company_correction_parses() {
        let llm = Arc::new(MockLlm::with_response(json!({
            "type": "company_match",
            "payload": { "company_name": "Schur Flexibles" },
            "confidence": 0.96
        })));
        let parser = FeedbackParser::new(llm.clone());

        let parsed = parser
            .parse(&original(), "Company should be Schur Flexibles")
            .unwrap();
        assert_eq!(parsed.correction_type, CorrectionType::CompanyMatch);
        assert_eq!(parsed.payload["company_name"], "Schur Flexibles");

        // The prompt carried the original context and the operator text.
        let prompt = &llm.prompts()[0];
        assert!(prompt.contains("ORDER_1_x"));
        assert!(prompt.contains("Company should be Schur Flexibles"));
    }

    #[test]
    fn clarify_carries_question() {
        let llm = Arc::new(MockLlm::with_response(json!({
            "type": "clarify",
            "payload": {},
            "confidence": 0.3,
            "question": "Which line item do you mean?"
        })));
        let parser = FeedbackParser::new(llm);

        let parsed = parser.parse(&original(), "the second one is wrong").unwrap();
        assert_eq!(parsed.correction_type, CorrectionType::Clarify);
        assert_eq!(parsed.question.as_deref(), Some("Which line item do you mean?"));
    }

    #[test]
    fn unknown_type_is_parse_error() {
        let llm = Arc::new(MockLlm::with_response(json!({
            "type": "upside_down",
            "payload": {},
            "confidence": 0.9
        })));
        let parser = FeedbackParser::new(llm);
        assert!(matches!(
            parser.parse(&original(), "??"),
            Err(FeedbackError::Parse(_))
        ));
    }
}
