use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::extraction::Extraction;
use super::matching::{CustomerMatch, LineItemMatch};

/// Overall outcome of processing one message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Ok,
    RequiresReview,
    Failed,
}

/// Per-line-item check against the live ERP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErpItemCheck {
    pub line_index: usize,
    pub product_id: i64,
    pub exists: bool,
    #[serde(default)]
    pub erp_name: Option<String>,
    #[serde(default)]
    pub list_price: Option<f64>,
}

/// How the customer was resolved in the ERP.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CustomerResolution {
    LocalId,
    NameSearch,
    Unresolved,
}

/// Customer verification against the live ERP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErpCustomerCheck {
    pub verified: bool,
    #[serde(default)]
    pub erp_id: Option<i64>,
    pub resolved_by: CustomerResolution,
}

/// Outcome of the ERP verification stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErpVerification {
    pub items: Vec<ErpItemCheck>,
    pub customer: ErpCustomerCheck,
}

impl ErpVerification {
    /// True when every checked item exists and the customer is verified.
    pub fn all_verified(&self) -> bool {
        self.customer.verified && self.items.iter().all(|i| i.exists)
    }
}

/// Outcome of the (optional) order writer stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OrderOutcome {
    Created { erp_order_id: i64, order_key: String },
    /// Idempotency key already submitted; treated as success.
    Duplicate { order_key: String },
    NotCreated { reason: String },
}

/// Full result of processing one message. Persisted in the audit
/// directory keyed by `{timestamp}_{message_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub message_id: String,
    /// Stable operator-facing id (`ORDER_{n}_{timestamp}`).
    pub order_id: String,
    pub extraction: Extraction,
    pub matches: Vec<LineItemMatch>,
    pub customer_match: CustomerMatch,
    #[serde(default)]
    pub erp_verification: Option<ErpVerification>,
    #[serde(default)]
    pub order: Option<OrderOutcome>,
    pub created_at: NaiveDateTime,
    pub status: ProcessingStatus,
}

impl ProcessingResult {
    pub fn requires_review(&self) -> bool {
        self.status == ProcessingStatus::RequiresReview
            || self.matches.iter().any(|m| m.requires_review)
    }
}
