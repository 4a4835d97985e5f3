pub mod processor;

pub use processor::*;

use thiserror::Error;

/// Failures that abort processing of one message (and leave it unread
/// for replay). Degradable conditions — schema violations, verification
/// misses, unmatched items — never surface here; they end up as
/// `requires_review` on the audited result instead.
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Audit setup failed: {0}")]
    Audit(#[from] crate::audit::AuditError),

    #[error("Cleaning failed: {0}")]
    Clean(#[from] crate::cleaner::CleanError),

    #[error("LLM unavailable: {0}")]
    Llm(crate::llm::LlmError),
}
