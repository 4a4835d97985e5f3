//! Operator digests and stable order ids.
//!
//! Every ProcessingResult gets an `ORDER_{n}_{timestamp}` id that the
//! operator can reference in corrections. The counter survives restarts
//! via a state file; the (chat message id → order id) mapping is kept so
//! replies can be correlated without the operator quoting the id.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::fsio;
use crate::models::{OrderOutcome, ProcessingResult, ProcessingStatus};

use super::gateway::ChatGateway;
use super::NotifyError;

/// Allocates stable operator-facing order ids.
pub struct OrderIdAllocator {
    path: PathBuf,
    counter: Mutex<u64>,
}

impl OrderIdAllocator {
    pub fn load(audit_dir: &Path) -> Self {
        let path = audit_dir.join("order_counter.txt");
        let counter = std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0);
        Self {
            path,
            counter: Mutex::new(counter),
        }
    }

    /// Next id: `ORDER_{n}_{YYYYMMDDHHMMSS}`.
    pub fn next(&self, at: NaiveDateTime) -> String {
        let mut counter = self.counter.lock().unwrap_or_else(|e| e.into_inner());
        *counter += 1;
        if let Err(e) = fsio::write_atomic(&self.path, counter.to_string().as_bytes()) {
            tracing::error!(error = %e, "Order counter persist failed");
        }
        format!("ORDER_{}_{}", *counter, at.format("%Y%m%d%H%M%S"))
    }
}

/// Chat-message-to-order correlation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifiedMessage {
    pub chat_message_id: i64,
    pub order_id: String,
    pub sent_at: NaiveDateTime,
}

pub struct Notifier {
    gateway: Arc<dyn ChatGateway>,
    chat_id: String,
    enabled: bool,
    reply_map_path: PathBuf,
}

impl Notifier {
    pub fn new(
        gateway: Arc<dyn ChatGateway>,
        chat_id: &str,
        enabled: bool,
        feedback_dir: &Path,
    ) -> Self {
        Self {
            gateway,
            chat_id: chat_id.to_string(),
            enabled,
            reply_map_path: feedback_dir.join("notified_messages.jsonl"),
        }
    }

    /// Post the digest for one result. Failures are logged — notification
    /// is not allowed to fail processing.
    pub fn notify_result(&self, result: &ProcessingResult) {
        if !self.enabled {
            tracing::debug!(order_id = %result.order_id, "Notifications disabled — skipping digest");
            return;
        }

        let digest = format_digest(result);
        match self.gateway.send_message(&self.chat_id, &digest) {
            Ok(chat_message_id) => {
                let record = NotifiedMessage {
                    chat_message_id,
                    order_id: result.order_id.clone(),
                    sent_at: chrono::Utc::now().naive_utc(),
                };
                if let Err(e) = fsio::append_jsonl(&self.reply_map_path, &record) {
                    tracing::error!(error = %e, "Reply-map append failed");
                }
            }
            Err(e) => {
                tracing::error!(order_id = %result.order_id, error = %e, "Digest send failed");
            }
        }
    }

    /// Free-form message to the operator channel (acknowledgements,
    /// clarification questions, before/after digests).
    pub fn send_text(&self, text: &str) -> Result<i64, NotifyError> {
        self.gateway.send_message(&self.chat_id, text)
    }

    /// Order id a chat message id belongs to, if it was one of ours.
    pub fn order_id_for_message(&self, chat_message_id: i64) -> Option<String> {
        let records: Vec<NotifiedMessage> = fsio::read_jsonl(&self.reply_map_path).ok()?;
        records
            .iter()
            .rev()
            .find(|r| r.chat_message_id == chat_message_id)
            .map(|r| r.order_id.clone())
    }
}

/// Short operator digest for one processed message.
pub fn format_digest(result: &ProcessingResult) -> String {
    let status_icon = match result.status {
        ProcessingStatus::Ok => "OK",
        ProcessingStatus::RequiresReview => "REVIEW",
        ProcessingStatus::Failed => "FAILED",
    };

    let mut lines = Vec::new();
    lines.push(format!("[{status_icon}] {}", result.order_id));
    lines.push(format!(
        "From: {}",
        result.extraction.customer.name.as_deref().unwrap_or("(unknown customer)")
    ));
    lines.push(format!("Intent: {}", result.extraction.intent_type.as_str()));

    for (idx, item) in result.extraction.line_items.iter().enumerate() {
        let matched = result.matches.iter().find(|m| m.line_index == idx);
        let mark = match matched.and_then(|m| m.chosen_product_id) {
            Some(id) => {
                let review = matched.is_some_and(|m| m.requires_review);
                format!("#{id}{}", if review { " (review)" } else { "" })
            }
            None => "no match".to_string(),
        };
        lines.push(format!(
            "  {}x {} -> {mark}",
            item.quantity,
            item.raw_code.as_deref().unwrap_or(&item.raw_name)
        ));
    }

    match &result.order {
        Some(OrderOutcome::Created { erp_order_id, .. }) => {
            lines.push(format!("Draft order created: ERP #{erp_order_id}"));
        }
        Some(OrderOutcome::Duplicate { .. }) => {
            lines.push("Order already submitted earlier".to_string());
        }
        Some(OrderOutcome::NotCreated { reason }) => {
            lines.push(format!("Order not created: {reason}"));
        }
        None => {}
    }

    lines.push(format!("Reply to this message to correct {}", result.order_id));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CustomerMatch, ExtractedCustomer, Extraction, IntentType, LineItem};
    use crate::notify::gateway::MockGateway;

    fn ts() -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap()
    }

    fn sample_result(order_id: &str) -> ProcessingResult {
        ProcessingResult {
            message_id: "msg-1".into(),
            order_id: order_id.into(),
            extraction: Extraction {
                intent_type: IntentType::OrderInquiry,
                intent_confidence: 0.9,
                customer: ExtractedCustomer {
                    name: Some("Schur GmbH".into()),
                    ..Default::default()
                },
                line_items: vec![LineItem {
                    raw_name: "blade".into(),
                    raw_code: Some("L1520-457".into()),
                    quantity: 14.0,
                    unit_price: None,
                    attributes: Default::default(),
                }],
                order_ref: None,
                notes: None,
            },
            matches: vec![crate::models::LineItemMatch {
                line_index: 0,
                candidates: vec![],
                chosen_product_id: Some(8653),
                confidence: 1.0,
                method: crate::models::MatchMethod::ExactCode,
                requires_review: false,
            }],
            customer_match: CustomerMatch::default(),
            erp_verification: None,
            order: None,
            created_at: ts(),
            status: ProcessingStatus::Ok,
        }
    }

    #[test]
    fn allocator_is_monotonic_and_persistent() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = OrderIdAllocator::load(dir.path());

        let id1 = alloc.next(ts());
        let id2 = alloc.next(ts());
        assert!(id1.starts_with("ORDER_1_20240115103000"));
        assert!(id2.starts_with("ORDER_2_"));

        // Restart resumes the counter.
        let alloc2 = OrderIdAllocator::load(dir.path());
        let id3 = alloc2.next(ts());
        assert!(id3.starts_with("ORDER_3_"));
    }

    #[test]
    fn digest_contains_order_id_and_lines() {
        let digest = format_digest(&sample_result("ORDER_7_20240115103000"));
        assert!(digest.contains("ORDER_7_20240115103000"));
        assert!(digest.contains("14x L1520-457"));
        assert!(digest.contains("#8653"));
        assert!(digest.contains("[OK]"));
    }

    #[test]
    fn notify_records_reply_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(MockGateway::new());
        let notifier = Notifier::new(gateway.clone(), "chat-1", true, dir.path());

        notifier.notify_result(&sample_result("ORDER_1_x"));

        let sent = gateway.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "chat-1");

        // The message id handed back by the gateway maps to the order.
        let records: Vec<NotifiedMessage> =
            fsio::read_jsonl(&dir.path().join("notified_messages.jsonl")).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(
            notifier.order_id_for_message(records[0].chat_message_id),
            Some("ORDER_1_x".to_string())
        );
    }

    #[test]
    fn disabled_notifier_sends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(MockGateway::new());
        let notifier = Notifier::new(gateway.clone(), "chat-1", false, dir.path());

        notifier.notify_result(&sample_result("ORDER_1_x"));
        assert!(gateway.sent_messages().is_empty());
    }

    #[test]
    fn unknown_message_id_has_no_order() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(MockGateway::new());
        let notifier = Notifier::new(gateway, "chat-1", true, dir.path());
        assert!(notifier.order_id_for_message(12345).is_none());
    }
}
