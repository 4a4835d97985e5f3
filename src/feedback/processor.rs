//! Feedback processing: resolve which result a correction refers to,
//! parse it, persist correction + training example, acknowledge, and
//! (optionally) retrain the extractor and re-run the original message.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::audit::AuditLogger;
use crate::mailbox::Mailbox;
use crate::models::{Correction, CorrectionType, ProcessingResult, TrainingExample};
use crate::notify::Notifier;
use crate::pipeline::MessageProcessor;

use super::parser::FeedbackParser;
use super::store::FeedbackStore;
use super::FeedbackError;

/// One inbound correction from the operator channel.
#[derive(Debug, Clone)]
pub struct InboundFeedback {
    pub order_id_hint: Option<String>,
    /// Chat message id the operator replied to, if any.
    pub reply_to_message_id: Option<i64>,
    pub user_text: String,
    pub operator: String,
}

#[derive(Debug)]
pub enum FeedbackOutcome {
    /// Parser could not commit; the clarification question was sent.
    Clarification { question: String },
    /// Correction and training example persisted.
    Stored {
        correction_id: Uuid,
        correction_type: CorrectionType,
        order_id: String,
    },
    /// No result could be resolved; the operator was told.
    Unresolved,
}

#[derive(Debug, Clone)]
pub struct FeedbackConfig {
    pub confidence_floor: f32,
    /// Fallback window for "most recent result" resolution.
    pub resolution_window: Duration,
    pub immediate_retrain: bool,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            confidence_floor: 0.6,
            resolution_window: Duration::from_secs(600),
            immediate_retrain: false,
        }
    }
}

pub struct FeedbackProcessor {
    parser: FeedbackParser,
    store: FeedbackStore,
    audit: AuditLogger,
    notifier: Arc<Notifier>,
    config: FeedbackConfig,
    /// Set when immediate-learn mode is wired up.
    learner: Option<(Arc<MessageProcessor>, Arc<dyn Mailbox>)>,
}

impl FeedbackProcessor {
    pub fn new(
        parser: FeedbackParser,
        store: FeedbackStore,
        audit: AuditLogger,
        notifier: Arc<Notifier>,
        config: FeedbackConfig,
    ) -> Self {
        Self {
            parser,
            store,
            audit,
            notifier,
            config,
            learner: None,
        }
    }

    /// Enable immediate-learn: retrain the extractor and re-run the
    /// original message after each stored correction.
    pub fn with_learner(
        mut self,
        processor: Arc<MessageProcessor>,
        mailbox: Arc<dyn Mailbox>,
    ) -> Self {
        self.learner = Some((processor, mailbox));
        self
    }

    pub fn store(&self) -> &FeedbackStore {
        &self.store
    }

    /// Handle one inbound correction end to end.
    pub fn handle(&self, inbound: &InboundFeedback) -> Result<FeedbackOutcome, FeedbackError> {
        let Some(order_id) = self.resolve_order_id(inbound) else {
            tracing::info!(operator = %inbound.operator, "Correction could not be resolved to an order");
            self.reply("Could not tell which order you mean — reply directly to its digest or quote the ORDER id.");
            return Ok(FeedbackOutcome::Unresolved);
        };

        let original = self
            .audit
            .find_result(&order_id)
            .ok_or_else(|| FeedbackError::UnknownOrder(order_id.clone()))?;

        let parsed = self.parser.parse(&original, &inbound.user_text)?;

        if parsed.correction_type == CorrectionType::Clarify
            || parsed.confidence < self.config.confidence_floor
        {
            let question = parsed
                .question
                .clone()
                .unwrap_or_else(|| format!("What exactly should change on {order_id}?"));
            self.reply(&question);
            return Ok(FeedbackOutcome::Clarification { question });
        }

        let correction = Correction {
            correction_id: Uuid::new_v4(),
            order_id: order_id.clone(),
            user_text: inbound.user_text.clone(),
            parsed: parsed.clone(),
            created_at: chrono::Utc::now().naive_utc(),
            applied: true,
        };

        let input_text = self
            .audit
            .cleaned_text_for(&original.message_id)
            .unwrap_or_default();
        let example = derive_training_example(&original, &correction, &input_text);

        self.store.append_correction(&correction)?;
        self.store.append_training(&example)?;

        tracing::info!(
            order_id = %order_id,
            correction_type = correction.parsed.correction_type.as_str(),
            "Correction stored"
        );
        self.reply(&format!(
            "Correction recorded for {order_id} ({}).",
            correction.parsed.correction_type.as_str()
        ));

        if self.config.immediate_retrain {
            self.immediate_learn(&original, &correction);
        }

        Ok(FeedbackOutcome::Stored {
            correction_id: correction.correction_id,
            correction_type: correction.parsed.correction_type,
            order_id,
        })
    }

    /// Resolution order: explicit hint, reply-to lookup, ORDER id regex,
    /// most recent result within the window.
    fn resolve_order_id(&self, inbound: &InboundFeedback) -> Option<String> {
        if let Some(hint) = &inbound.order_id_hint {
            if self.audit.find_result(hint).is_some() {
                return Some(hint.clone());
            }
        }

        if let Some(reply_to) = inbound.reply_to_message_id {
            if let Some(order_id) = self.notifier.order_id_for_message(reply_to) {
                return Some(order_id);
            }
        }

        if let Some(found) = order_id_pattern().find(&inbound.user_text) {
            let candidate = found.as_str().to_string();
            if self.audit.find_result(&candidate).is_some() {
                return Some(candidate);
            }
        }

        let window =
            chrono::Duration::from_std(self.config.resolution_window).unwrap_or_else(|_| {
                chrono::Duration::seconds(600)
            });
        let cutoff = chrono::Utc::now().naive_utc() - window;
        self.audit.latest_result_since(cutoff).map(|r| r.order_id)
    }

    fn immediate_learn(&self, original: &ProcessingResult, correction: &Correction) {
        let Some((processor, mailbox)) = &self.learner else {
            tracing::warn!("Immediate retrain enabled but no learner wired");
            return;
        };

        let examples = match self.store.training_examples() {
            Ok(examples) => examples,
            Err(e) => {
                tracing::error!(error = %e, "Training store unreadable — skipping retrain");
                return;
            }
        };
        processor.extractor().retrain_with(&examples);

        let message = match mailbox.fetch(&original.message_id) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Original message unavailable — skipping validation run");
                return;
            }
        };

        match processor.process(&message) {
            Ok(reprocessed) => {
                self.reply(&format_relearn_digest(original, &reprocessed, correction));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Validation re-run failed");
            }
        }
    }

    fn reply(&self, text: &str) {
        if let Err(e) = self.notifier.send_text(text) {
            tracing::error!(error = %e, "Feedback reply failed");
        }
    }
}

fn order_id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"ORDER_\d+_\d+").unwrap())
}

/// Derive the training example: input is the original cleaned message,
/// expected output is the original extraction with ONLY the corrected
/// fields replaced.
pub fn derive_training_example(
    original: &ProcessingResult,
    correction: &Correction,
    input_text: &str,
) -> TrainingExample {
    let mut expected =
        serde_json::to_value(&original.extraction).unwrap_or_else(|_| json!({}));
    let payload = &correction.parsed.payload;

    let (signature, weight) = match correction.parsed.correction_type {
        CorrectionType::CompanyMatch => {
            if let Some(name) = payload.get("company_name").and_then(Value::as_str) {
                expected["customer"]["name"] = json!(name);
            }
            ("customer_identity", 1.0)
        }
        CorrectionType::ProductMatch => {
            if let (Some(idx), Some(code)) = (
                payload.get("line_index").and_then(Value::as_u64),
                payload.get("product_code").and_then(Value::as_str),
            ) {
                if let Some(item) = expected["line_items"].get_mut(idx as usize) {
                    item["raw_code"] = json!(code);
                }
            }
            ("line_item_product", 1.0)
        }
        CorrectionType::Quantity => {
            if let (Some(idx), Some(quantity)) = (
                payload.get("line_index").and_then(Value::as_u64),
                payload.get("quantity").and_then(Value::as_f64),
            ) {
                if let Some(item) = expected["line_items"].get_mut(idx as usize) {
                    item["quantity"] = json!(quantity);
                }
            }
            ("line_item_quantity", 1.0)
        }
        CorrectionType::Price => {
            if let (Some(idx), Some(price)) = (
                payload.get("line_index").and_then(Value::as_u64),
                payload.get("unit_price").and_then(Value::as_f64),
            ) {
                if let Some(item) = expected["line_items"].get_mut(idx as usize) {
                    item["unit_price"] = json!(price);
                }
            }
            ("line_item_price", 1.0)
        }
        // A confirmation is a weaker positive example of the original.
        CorrectionType::Confirm => ("confirmation", 0.5),
        CorrectionType::Reject => ("rejection", 1.0),
        CorrectionType::Clarify => ("clarification", 0.0),
    };

    TrainingExample {
        signature: signature.to_string(),
        input: input_text.to_string(),
        expected_output: expected,
        weight,
        derived_from_correction_id: correction.correction_id,
    }
}

/// Before/After/Expected digest posted after an immediate-learn re-run.
pub fn format_relearn_digest(
    original: &ProcessingResult,
    reprocessed: &ProcessingResult,
    correction: &Correction,
) -> String {
    let field = |r: &ProcessingResult| match correction.parsed.correction_type {
        CorrectionType::CompanyMatch => r
            .extraction
            .customer
            .name
            .clone()
            .unwrap_or_else(|| "(none)".into()),
        _ => format!("{} line items", r.extraction.line_items.len()),
    };

    let expected = match correction.parsed.correction_type {
        CorrectionType::CompanyMatch => correction
            .parsed
            .payload
            .get("company_name")
            .and_then(Value::as_str)
            .unwrap_or("(unspecified)")
            .to_string(),
        _ => correction.parsed.payload.to_string(),
    };

    format!(
        "Relearn check for {}\nBefore: {}\nAfter: {}\nExpected: {}",
        original.order_id,
        field(original),
        field(reprocessed),
        expected
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;
    use crate::models::{
        CustomerMatch, ExtractedCustomer, Extraction, IntentType, LineItem, ParsedCorrection,
        ProcessingStatus,
    };
    use crate::notify::MockGateway;
    use chrono::NaiveDateTime;

    struct Fixture {
        feedback: FeedbackProcessor,
        gateway: Arc<MockGateway>,
        llm: Arc<MockLlm>,
        audit: AuditLogger,
        _dir: tempfile::TempDir,
    }

    fn result(order_id: &str, at: NaiveDateTime) -> ProcessingResult {
        ProcessingResult {
            message_id: "msg-1".into(),
            order_id: order_id.into(),
            extraction: Extraction {
                intent_type: IntentType::OrderInquiry,
                intent_confidence: 0.9,
                customer: ExtractedCustomer {
                    name: Some("SDS GmbH".into()),
                    ..Default::default()
                },
                line_items: vec![LineItem {
                    raw_name: "blade".into(),
                    raw_code: Some("L1520-457".into()),
                    quantity: 14.0,
                    unit_price: Some(40.0),
                    attributes: Default::default(),
                }],
                order_ref: None,
                notes: None,
            },
            matches: vec![],
            customer_match: CustomerMatch::default(),
            erp_verification: None,
            order: None,
            created_at: at,
            status: ProcessingStatus::Ok,
        }
    }

    fn fixture(config: FeedbackConfig) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let audit_dir = dir.path().join("audit");
        let feedback_dir = dir.path().join("feedback");

        let llm = Arc::new(MockLlm::new());
        let gateway = Arc::new(MockGateway::new());
        let notifier = Arc::new(Notifier::new(gateway.clone(), "chat-1", true, &feedback_dir));

        let feedback = FeedbackProcessor::new(
            FeedbackParser::new(llm.clone()),
            FeedbackStore::new(&feedback_dir),
            AuditLogger::new(&audit_dir),
            notifier,
            config,
        );

        Fixture {
            feedback,
            gateway,
            llm,
            audit: AuditLogger::new(&audit_dir),
            _dir: dir,
        }
    }

    fn persist_result(audit: &AuditLogger, r: &ProcessingResult) {
        let entry = audit.begin(&r.message_id, r.created_at).unwrap();
        entry.write_step(
            "parsing.json",
            &json!({"cleaned_text": "Please ship 14x L1520-457"}),
        );
        entry.write_summary(r);
    }

    fn company_correction_response() -> Value {
        json!({
            "type": "company_match",
            "payload": { "company_name": "Schur Flexibles" },
            "confidence": 0.95
        })
    }

    #[test]
    fn correction_roundtrip_stores_one_of_each() {
        // S7: operator corrects the company on a processed result.
        let f = fixture(FeedbackConfig::default());
        let now = chrono::Utc::now().naive_utc();
        persist_result(&f.audit, &result("ORDER_1_20240115103000", now));
        f.llm.push_response(company_correction_response());

        let outcome = f
            .feedback
            .handle(&InboundFeedback {
                order_id_hint: None,
                reply_to_message_id: None,
                user_text: "ORDER_1_20240115103000: Company should be Schur Flexibles".into(),
                operator: "op".into(),
            })
            .unwrap();

        let FeedbackOutcome::Stored {
            correction_type, ..
        } = outcome
        else {
            panic!("expected Stored");
        };
        assert_eq!(correction_type, CorrectionType::CompanyMatch);

        let corrections = f.feedback.store().corrections().unwrap();
        assert_eq!(corrections.len(), 1);
        assert_eq!(corrections[0].order_id, "ORDER_1_20240115103000");
        assert!(corrections[0].applied);

        let examples = f.feedback.store().training_examples().unwrap();
        assert_eq!(examples.len(), 1);
        assert_eq!(examples[0].signature, "customer_identity");
        assert_eq!(
            examples[0].expected_output["customer"]["name"],
            "Schur Flexibles"
        );
        // Untouched fields copied from the original extraction.
        assert_eq!(
            examples[0].expected_output["line_items"][0]["raw_code"],
            "L1520-457"
        );
        assert_eq!(examples[0].input, "Please ship 14x L1520-457");

        // Acknowledgement went to the operator.
        let sent = f.gateway.sent_messages();
        assert!(sent.iter().any(|(_, text)| text.contains("Correction recorded")));
    }

    #[test]
    fn resolves_by_reply_to_message() {
        let f = fixture(FeedbackConfig::default());
        let now = chrono::Utc::now().naive_utc();
        let r = result("ORDER_2_x", now);
        persist_result(&f.audit, &r);

        // The digest was notified once; its chat message id maps to the order.
        let feedback_dir = f._dir.path().join("feedback");
        let notifier = Notifier::new(f.gateway.clone(), "chat-1", true, &feedback_dir);
        notifier.notify_result(&r);
        let records: Vec<crate::notify::NotifiedMessage> =
            crate::fsio::read_jsonl(&feedback_dir.join("notified_messages.jsonl")).unwrap();
        let chat_message_id = records[0].chat_message_id;

        f.llm.push_response(company_correction_response());
        let outcome = f
            .feedback
            .handle(&InboundFeedback {
                order_id_hint: None,
                reply_to_message_id: Some(chat_message_id),
                user_text: "Company should be Schur Flexibles".into(),
                operator: "op".into(),
            })
            .unwrap();

        assert!(matches!(outcome, FeedbackOutcome::Stored { order_id, .. } if order_id == "ORDER_2_x"));
    }

    #[test]
    fn resolves_by_recent_window() {
        let f = fixture(FeedbackConfig::default());
        let now = chrono::Utc::now().naive_utc();
        persist_result(&f.audit, &result("ORDER_3_x", now));

        f.llm.push_response(company_correction_response());
        let outcome = f
            .feedback
            .handle(&InboundFeedback {
                order_id_hint: None,
                reply_to_message_id: None,
                user_text: "Company should be Schur Flexibles".into(),
                operator: "op".into(),
            })
            .unwrap();
        assert!(matches!(outcome, FeedbackOutcome::Stored { order_id, .. } if order_id == "ORDER_3_x"));
    }

    #[test]
    fn old_results_not_resolved_by_window() {
        let f = fixture(FeedbackConfig::default());
        let old = chrono::Utc::now().naive_utc() - chrono::Duration::hours(2);
        persist_result(&f.audit, &result("ORDER_4_x", old));

        let outcome = f
            .feedback
            .handle(&InboundFeedback {
                order_id_hint: None,
                reply_to_message_id: None,
                user_text: "wrong company".into(),
                operator: "op".into(),
            })
            .unwrap();
        assert!(matches!(outcome, FeedbackOutcome::Unresolved));
        // No LLM call was made.
        assert_eq!(f.llm.call_count(), 0);
    }

    #[test]
    fn clarify_sends_question_and_stores_nothing() {
        let f = fixture(FeedbackConfig::default());
        let now = chrono::Utc::now().naive_utc();
        persist_result(&f.audit, &result("ORDER_5_x", now));

        f.llm.push_response(json!({
            "type": "clarify",
            "payload": {},
            "confidence": 0.2,
            "question": "Which line item?"
        }));

        let outcome = f
            .feedback
            .handle(&InboundFeedback {
                order_id_hint: Some("ORDER_5_x".into()),
                reply_to_message_id: None,
                user_text: "that one is wrong".into(),
                operator: "op".into(),
            })
            .unwrap();

        assert!(matches!(outcome, FeedbackOutcome::Clarification { .. }));
        assert!(f.feedback.store().corrections().unwrap().is_empty());
        assert!(f
            .gateway
            .sent_messages()
            .iter()
            .any(|(_, text)| text.contains("Which line item?")));
    }

    #[test]
    fn low_confidence_treated_as_clarification() {
        let f = fixture(FeedbackConfig::default());
        let now = chrono::Utc::now().naive_utc();
        persist_result(&f.audit, &result("ORDER_6_x", now));

        f.llm.push_response(json!({
            "type": "quantity",
            "payload": { "line_index": 0, "quantity": 20 },
            "confidence": 0.3
        }));

        let outcome = f
            .feedback
            .handle(&InboundFeedback {
                order_id_hint: Some("ORDER_6_x".into()),
                reply_to_message_id: None,
                user_text: "maybe 20?".into(),
                operator: "op".into(),
            })
            .unwrap();
        assert!(matches!(outcome, FeedbackOutcome::Clarification { .. }));
    }

    #[test]
    fn quantity_correction_updates_only_quantity() {
        let now = chrono::Utc::now().naive_utc();
        let original = result("ORDER_7_x", now);
        let correction = Correction {
            correction_id: Uuid::new_v4(),
            order_id: "ORDER_7_x".into(),
            user_text: "quantity is 20".into(),
            parsed: ParsedCorrection {
                correction_type: CorrectionType::Quantity,
                payload: json!({"line_index": 0, "quantity": 20.0}),
                confidence: 0.9,
                question: None,
            },
            created_at: now,
            applied: true,
        };

        let example = derive_training_example(&original, &correction, "input text");
        assert_eq!(example.signature, "line_item_quantity");
        assert_eq!(example.expected_output["line_items"][0]["quantity"], 20.0);
        // Price untouched.
        assert_eq!(example.expected_output["line_items"][0]["unit_price"], 40.0);
    }

    #[test]
    fn relearn_digest_shows_before_after_expected() {
        let now = chrono::Utc::now().naive_utc();
        let original = result("ORDER_8_x", now);
        let mut reprocessed = original.clone();
        reprocessed.extraction.customer.name = Some("Schur Flexibles".into());

        let correction = Correction {
            correction_id: Uuid::new_v4(),
            order_id: "ORDER_8_x".into(),
            user_text: "Company should be Schur Flexibles".into(),
            parsed: ParsedCorrection {
                correction_type: CorrectionType::CompanyMatch,
                payload: json!({"company_name": "Schur Flexibles"}),
                confidence: 0.95,
                question: None,
            },
            created_at: now,
            applied: true,
        };

        let digest = format_relearn_digest(&original, &reprocessed, &correction);
        assert!(digest.contains("Before: SDS GmbH"));
        assert!(digest.contains("After: Schur Flexibles"));
        assert!(digest.contains("Expected: Schur Flexibles"));
    }
}
