//! Prompt and schema for the extraction call.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A few-shot example carried in the extraction prompt. Refreshed from
/// the training store by `Extractor::retrain_with`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptExample {
    pub input_excerpt: String,
    pub expected_json: Value,
}

/// JSON schema the extraction response must conform to.
pub fn extraction_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "intent_type": {
                "type": "string",
                "enum": ["order_inquiry", "invoice_inquiry", "product_inquiry", "general_inquiry", "other"]
            },
            "intent_confidence": { "type": "number", "minimum": 0, "maximum": 1 },
            "customer": {
                "type": "object",
                "properties": {
                    "name": { "type": ["string", "null"] },
                    "contact": { "type": ["string", "null"] },
                    "email": { "type": ["string", "null"] },
                    "phone": { "type": ["string", "null"] },
                    "address": { "type": ["string", "null"] }
                }
            },
            "line_items": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "raw_name": { "type": "string" },
                        "raw_code": { "type": ["string", "null"] },
                        "quantity": { "type": "number" },
                        "unit_price": { "type": ["number", "null"] },
                        "attributes": {
                            "type": "object",
                            "properties": {
                                "brand": { "type": ["string", "null"] },
                                "product_line": { "type": ["string", "null"] },
                                "machine_type": { "type": ["string", "null"] },
                                "width_mm": { "type": ["number", "null"] },
                                "height_mm": { "type": ["number", "null"] },
                                "thickness_mm": { "type": ["number", "null"] },
                                "length_m": { "type": ["number", "null"] },
                                "color": { "type": ["string", "null"] }
                            }
                        }
                    },
                    "required": ["raw_name", "quantity"]
                }
            },
            "order_ref": { "type": ["string", "null"] },
            "notes": { "type": ["string", "null"] }
        },
        "required": ["intent_type", "intent_confidence", "customer", "line_items"]
    })
}

const GUIDELINES: &str = "\
You interpret one B2B customer email for an industrial supplier and return JSON only.

Rules:
- intent_type is one of: order_inquiry, invoice_inquiry, product_inquiry, general_inquiry, other.
- line_items is an array of objects. Never return separate parallel arrays \
for names, codes, quantities or prices.
- raw_code is the exact article/product code as written (e.g. \"L1520-457\", \"3M9353R\", \"SDS1923\"). \
Generic nouns like tape, blade, seal, Klebeband, Dichtung are NOT codes — leave raw_code null \
and keep them in raw_name.
- Quantities and prices use a dot as decimal separator. Convert decimal commas.
- Dimension attributes (width_mm, thickness_mm, length_m) only when the text states them \
with an explicit unit or dimension context, never from a bare number.
- The customer is the company that WROTE the email, not the supplier it is addressed to.
- order_ref is the customer's own purchase-order reference, when present.";

/// Build the extraction prompt for one cleaned message.
pub fn build_extraction_prompt(
    cleaned_text: &str,
    sender: &str,
    examples: &[PromptExample],
) -> String {
    let mut prompt = String::with_capacity(cleaned_text.len() + 2048);
    prompt.push_str(GUIDELINES);
    prompt.push_str("\n\n");

    for example in examples {
        prompt.push_str("Example message:\n");
        prompt.push_str(&example.input_excerpt);
        prompt.push_str("\nExpected output:\n");
        prompt.push_str(&example.expected_json.to_string());
        prompt.push_str("\n\n");
    }

    prompt.push_str(&format!("Sender header: {sender}\n\nMessage:\n{cleaned_text}\n"));
    prompt
}

/// Build the one-shot repair prompt carrying the validator's complaints.
pub fn build_repair_prompt(
    cleaned_text: &str,
    sender: &str,
    previous_output: &Value,
    complaints: &[String],
) -> String {
    format!(
        "{GUIDELINES}\n\nSender header: {sender}\n\nMessage:\n{cleaned_text}\n\n\
Your previous output was rejected:\n{previous_output}\n\n\
Problems found:\n- {}\n\nReturn corrected JSON only.",
        complaints.join("\n- ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_names_line_items_array() {
        let schema = extraction_schema();
        assert_eq!(schema["properties"]["line_items"]["type"], "array");
        assert!(schema["required"]
            .as_array()
            .unwrap()
            .contains(&json!("line_items")));
    }

    #[test]
    fn prompt_contains_message_and_sender() {
        let p = build_extraction_prompt("Please ship 14x L1520-457", "buyer@schur.com", &[]);
        assert!(p.contains("Please ship 14x L1520-457"));
        assert!(p.contains("buyer@schur.com"));
        assert!(p.contains("parallel arrays"));
    }

    #[test]
    fn examples_are_embedded_in_order() {
        let examples = vec![PromptExample {
            input_excerpt: "5x SDS1923".into(),
            expected_json: json!({"line_items": [{"raw_code": "SDS1923"}]}),
        }];
        let p = build_extraction_prompt("msg", "s@x.de", &examples);
        assert!(p.contains("Example message:"));
        assert!(p.find("5x SDS1923").unwrap() < p.find("msg").unwrap());
    }

    #[test]
    fn repair_prompt_lists_complaints() {
        let p = build_repair_prompt(
            "msg",
            "s@x.de",
            &json!({"bad": true}),
            &["quantity must be positive".into()],
        );
        assert!(p.contains("quantity must be positive"));
        assert!(p.contains("rejected"));
    }
}
