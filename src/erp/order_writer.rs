//! Draft sales-order submission with a client-side idempotency ledger.
//!
//! The natural key is derived from `message_id + order_ref`; a key that
//! was already submitted refuses a second submission and reports the
//! conflict as success. Submission errors never block the rest of the
//! pipeline — they are captured on the outcome.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::fsio;
use crate::models::OrderOutcome;

use super::ErpClient;

const ORDER_MODEL: &str = "sale.order";

/// One line of the draft order.
#[derive(Debug, Clone)]
pub struct OrderLine {
    pub product_id: i64,
    pub quantity: f64,
    pub unit_price: Option<f64>,
}

/// Everything the writer needs to build one draft order.
#[derive(Debug, Clone)]
pub struct OrderDraft {
    pub customer_erp_id: i64,
    pub order_ref: Option<String>,
    pub lines: Vec<OrderLine>,
}

/// Ledger entry for a submitted order key.
#[derive(Debug, Serialize, Deserialize)]
struct SubmittedOrder {
    order_key: String,
    erp_order_id: i64,
    message_id: String,
    created_at: NaiveDateTime,
}

pub struct OrderWriter {
    erp: Arc<dyn ErpClient>,
    ledger_path: PathBuf,
    /// Serializes ledger read-check-append.
    ledger_lock: Mutex<()>,
}

impl OrderWriter {
    pub fn new(erp: Arc<dyn ErpClient>, audit_dir: &Path) -> Self {
        Self {
            erp,
            ledger_path: audit_dir.join("submitted_orders.jsonl"),
            ledger_lock: Mutex::new(()),
        }
    }

    /// Submit one draft sales order, idempotently per message.
    pub fn submit(&self, message_id: &str, draft: &OrderDraft) -> OrderOutcome {
        let order_key = natural_key(message_id, draft.order_ref.as_deref());

        let _guard = self.ledger_lock.lock().unwrap_or_else(|e| e.into_inner());

        match self.already_submitted(&order_key) {
            Ok(true) => {
                tracing::info!(order_key = %order_key, "Order key already submitted — refusing duplicate");
                return OrderOutcome::Duplicate { order_key };
            }
            Ok(false) => {}
            Err(e) => {
                // An unreadable ledger must not risk a double submission.
                return OrderOutcome::NotCreated {
                    reason: format!("idempotency ledger unreadable: {e}"),
                };
            }
        }

        let values = build_order_values(draft);
        match self.erp.create(ORDER_MODEL, &values) {
            Ok(erp_order_id) => {
                let entry = SubmittedOrder {
                    order_key: order_key.clone(),
                    erp_order_id,
                    message_id: message_id.to_string(),
                    created_at: chrono::Utc::now().naive_utc(),
                };
                if let Err(e) = fsio::append_jsonl(&self.ledger_path, &entry) {
                    tracing::error!(error = %e, "Order submitted but ledger append failed");
                }
                tracing::info!(erp_order_id, order_key = %order_key, "Draft sales order created");
                OrderOutcome::Created {
                    erp_order_id,
                    order_key,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Order submission failed");
                OrderOutcome::NotCreated {
                    reason: e.to_string(),
                }
            }
        }
    }

    fn already_submitted(&self, order_key: &str) -> Result<bool, crate::fsio::FsError> {
        let entries: Vec<SubmittedOrder> = fsio::read_jsonl(&self.ledger_path)?;
        Ok(entries.iter().any(|e| e.order_key == order_key))
    }
}

/// sha256 over `message_id|order_ref`.
pub fn natural_key(message_id: &str, order_ref: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(message_id.as_bytes());
    hasher.update(b"|");
    hasher.update(order_ref.unwrap_or("").as_bytes());
    format!("{:x}", hasher.finalize())
}

fn build_order_values(draft: &OrderDraft) -> serde_json::Value {
    let lines: Vec<serde_json::Value> = draft
        .lines
        .iter()
        .map(|line| {
            let mut values = json!({
                "product_id": line.product_id,
                "product_uom_qty": line.quantity,
            });
            if let Some(price) = line.unit_price {
                values["price_unit"] = json!(price);
            }
            json!([0, 0, values])
        })
        .collect();

    let mut values = json!({
        "partner_id": draft.customer_erp_id,
        "state": "draft",
        "order_line": lines,
    });
    if let Some(order_ref) = &draft.order_ref {
        values["client_order_ref"] = json!(order_ref);
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::erp::MockErp;

    fn draft() -> OrderDraft {
        OrderDraft {
            customer_erp_id: 77,
            order_ref: Some("PO-117".into()),
            lines: vec![
                OrderLine {
                    product_id: 8653,
                    quantity: 14.0,
                    unit_price: Some(42.5),
                },
                OrderLine {
                    product_id: 8798,
                    quantity: 14.0,
                    unit_price: None,
                },
            ],
        }
    }

    #[test]
    fn submit_creates_draft_order() {
        let dir = tempfile::tempdir().unwrap();
        let erp = Arc::new(MockErp::new());
        let writer = OrderWriter::new(erp.clone(), dir.path());

        let outcome = writer.submit("msg-1", &draft());
        let OrderOutcome::Created { erp_order_id, .. } = outcome else {
            panic!("expected Created, got {outcome:?}");
        };

        let orders = erp.records_for("sale.order");
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0]["partner_id"], json!(77));
        assert_eq!(orders[0]["state"], json!("draft"));
        assert_eq!(orders[0]["client_order_ref"], json!("PO-117"));
        assert_eq!(orders[0]["order_line"].as_array().unwrap().len(), 2);
        assert!(erp_order_id > 0);
    }

    #[test]
    fn second_submission_refused_as_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let erp = Arc::new(MockErp::new());
        let writer = OrderWriter::new(erp.clone(), dir.path());

        let first = writer.submit("msg-1", &draft());
        assert!(matches!(first, OrderOutcome::Created { .. }));

        let second = writer.submit("msg-1", &draft());
        assert!(matches!(second, OrderOutcome::Duplicate { .. }));

        assert_eq!(erp.records_for("sale.order").len(), 1);
    }

    #[test]
    fn idempotency_survives_writer_restart() {
        let dir = tempfile::tempdir().unwrap();
        let erp = Arc::new(MockErp::new());

        let writer = OrderWriter::new(erp.clone(), dir.path());
        writer.submit("msg-1", &draft());

        // New writer instance over the same ledger.
        let writer2 = OrderWriter::new(erp.clone(), dir.path());
        let outcome = writer2.submit("msg-1", &draft());
        assert!(matches!(outcome, OrderOutcome::Duplicate { .. }));
        assert_eq!(erp.records_for("sale.order").len(), 1);
    }

    #[test]
    fn different_messages_get_different_keys() {
        assert_ne!(
            natural_key("msg-1", Some("PO-117")),
            natural_key("msg-2", Some("PO-117"))
        );
        assert_ne!(
            natural_key("msg-1", Some("PO-117")),
            natural_key("msg-1", Some("PO-118"))
        );
        assert_eq!(
            natural_key("msg-1", Some("PO-117")),
            natural_key("msg-1", Some("PO-117"))
        );
    }

    #[test]
    fn submission_error_captured_not_propagated() {
        let dir = tempfile::tempdir().unwrap();
        let erp = Arc::new(MockErp::new());
        erp.set_fail_transport(true);
        let writer = OrderWriter::new(erp.clone(), dir.path());

        let outcome = writer.submit("msg-1", &draft());
        let OrderOutcome::NotCreated { reason } = outcome else {
            panic!("expected NotCreated");
        };
        assert!(reason.contains("transport"));

        // A failed submission does not poison the key.
        erp.set_fail_transport(false);
        assert!(matches!(
            writer.submit("msg-1", &draft()),
            OrderOutcome::Created { .. }
        ));
    }
}
