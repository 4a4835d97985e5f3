//! Per-message audit trail: one directory of JSON step artifacts plus a
//! human-readable summary.
//!
//! Auditing is observational. Failed writes are logged and processing
//! continues; nothing is ever rolled back because an artifact could not
//! be written. Directories are keyed by message id (with a timestamp
//! prefix), and a replay of the same message reuses its directory, which
//! keeps crash-replay idempotent.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::Serialize;
use thiserror::Error;

use crate::fsio;
use crate::models::{ProcessingResult, ProcessingStatus};

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Audit I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audit write error: {0}")]
    Fs(#[from] crate::fsio::FsError),
}

pub struct AuditLogger {
    audit_dir: PathBuf,
}

/// Handle to one message's audit directory.
pub struct AuditEntry {
    dir: PathBuf,
}

impl AuditLogger {
    pub fn new(audit_dir: &Path) -> Self {
        Self {
            audit_dir: audit_dir.to_path_buf(),
        }
    }

    /// Open the audit directory for a message, reusing an existing one
    /// from a previous (crashed) run of the same message.
    pub fn begin(&self, message_id: &str, at: NaiveDateTime) -> Result<AuditEntry, AuditError> {
        let safe_id = sanitize_id(message_id);

        if let Some(existing) = self.find_dir_for(&safe_id) {
            tracing::info!(message_id, dir = %existing.display(), "Reusing audit directory from earlier run");
            return Ok(AuditEntry { dir: existing });
        }

        let dir = self
            .audit_dir
            .join(format!("{}_{safe_id}", at.format("%Y%m%d_%H%M%S")));
        std::fs::create_dir_all(&dir)?;
        Ok(AuditEntry { dir })
    }

    fn find_dir_for(&self, safe_id: &str) -> Option<PathBuf> {
        let suffix = format!("_{safe_id}");
        let entries = std::fs::read_dir(&self.audit_dir).ok()?;
        entries
            .flatten()
            .map(|e| e.path())
            .find(|p| {
                p.is_dir()
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.ends_with(&suffix))
            })
    }

    /// Locate a persisted result by its operator-facing order id.
    pub fn find_result(&self, order_id: &str) -> Option<ProcessingResult> {
        self.all_results()
            .into_iter()
            .find(|r| r.order_id == order_id)
    }

    /// Prior persisted result for a message, if its summary exists.
    pub fn find_result_for_message(&self, message_id: &str) -> Option<ProcessingResult> {
        let dir = self.find_dir_for(&sanitize_id(message_id))?;
        let raw = std::fs::read_to_string(dir.join("summary.json")).ok()?;
        serde_json::from_str(&raw).ok()
    }

    /// Most recent result created at or after the cutoff.
    pub fn latest_result_since(&self, cutoff: NaiveDateTime) -> Option<ProcessingResult> {
        self.all_results()
            .into_iter()
            .filter(|r| r.created_at >= cutoff)
            .max_by_key(|r| r.created_at)
    }

    /// The cleaned text recorded for a message (from `parsing.json`).
    pub fn cleaned_text_for(&self, message_id: &str) -> Option<String> {
        let dir = self.find_dir_for(&sanitize_id(message_id))?;
        let parsing: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.join("parsing.json")).ok()?).ok()?;
        parsing
            .get("cleaned_text")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
    }

    /// Whether a message already has a complete audit (summary present).
    pub fn has_summary(&self, message_id: &str) -> bool {
        self.find_dir_for(&sanitize_id(message_id))
            .is_some_and(|dir| dir.join("summary.json").exists())
    }

    fn all_results(&self) -> Vec<ProcessingResult> {
        let Ok(entries) = std::fs::read_dir(&self.audit_dir) else {
            return Vec::new();
        };
        entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .filter_map(|dir| {
                let raw = std::fs::read_to_string(dir.join("summary.json")).ok()?;
                serde_json::from_str(&raw).ok()
            })
            .collect()
    }
}

impl AuditEntry {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write one step artifact. Best effort: failures are logged, never
    /// propagated.
    pub fn write_step<T: Serialize>(&self, filename: &str, value: &T) {
        let path = self.dir.join(filename);
        if let Err(e) = fsio::write_json_atomic(&path, value) {
            tracing::error!(path = %path.display(), error = %e, "Audit step write failed — continuing");
        }
    }

    /// Write `summary.json` and the human-readable `summary.txt`.
    pub fn write_summary(&self, result: &ProcessingResult) {
        self.write_step("summary.json", result);

        let text = render_summary(result);
        if let Err(e) = fsio::write_atomic(&self.dir.join("summary.txt"), text.as_bytes()) {
            tracing::error!(error = %e, "summary.txt write failed — continuing");
        }
    }
}

fn sanitize_id(message_id: &str) -> String {
    message_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect()
}

/// Operator-readable one-page summary.
pub fn render_summary(result: &ProcessingResult) -> String {
    let mut out = String::new();
    out.push_str(&format!("Order: {}\n", result.order_id));
    out.push_str(&format!("Message: {}\n", result.message_id));
    out.push_str(&format!("Processed: {}\n", result.created_at.format("%Y-%m-%d %H:%M:%S")));
    out.push_str(&format!(
        "Status: {}\n",
        match result.status {
            ProcessingStatus::Ok => "ok",
            ProcessingStatus::RequiresReview => "REQUIRES REVIEW",
            ProcessingStatus::Failed => "FAILED",
        }
    ));
    out.push_str(&format!(
        "Intent: {} ({:.0}%)\n",
        result.extraction.intent_type.as_str(),
        result.extraction.intent_confidence * 100.0
    ));
    out.push_str(&format!(
        "Customer: {}\n",
        result.extraction.customer.name.as_deref().unwrap_or("(unknown)")
    ));
    if let Some(order_ref) = &result.extraction.order_ref {
        out.push_str(&format!("Order ref: {order_ref}\n"));
    }

    out.push_str(&format!("\nLine items ({}):\n", result.extraction.line_items.len()));
    for (idx, item) in result.extraction.line_items.iter().enumerate() {
        let matched = result.matches.iter().find(|m| m.line_index == idx);
        let status = match matched {
            Some(m) => match m.chosen_product_id {
                Some(id) => format!(
                    "-> product {id} ({:?}, {:.2}{})",
                    m.method,
                    m.confidence,
                    if m.requires_review { ", review" } else { "" }
                ),
                None => "-> UNMATCHED".to_string(),
            },
            None => "-> no match record".to_string(),
        };
        out.push_str(&format!(
            "  {}. {}x {} {status}\n",
            idx + 1,
            item.quantity,
            item.raw_code.as_deref().unwrap_or(&item.raw_name),
        ));
    }

    if let Some(erp) = &result.erp_verification {
        out.push_str(&format!(
            "\nERP: customer {}, {}/{} items verified\n",
            if erp.customer.verified { "verified" } else { "NOT verified" },
            erp.items.iter().filter(|i| i.exists).count(),
            erp.items.len()
        ));
    }

    if let Some(order) = &result.order {
        out.push_str(&format!(
            "Order submission: {}\n",
            match order {
                crate::models::OrderOutcome::Created { erp_order_id, .. } =>
                    format!("created (ERP id {erp_order_id})"),
                crate::models::OrderOutcome::Duplicate { .. } => "duplicate, skipped".to_string(),
                crate::models::OrderOutcome::NotCreated { reason } =>
                    format!("not created: {reason}"),
            }
        ));
    }

    out
}
