pub mod cleaner;
pub mod extract;
pub mod strip;
pub mod terms;

pub use cleaner::*;
pub use extract::*;
pub use strip::*;
pub use terms::*;

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CleanError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("OCR failed: {0}")]
    Ocr(String),

    #[error("Extraction tool not available: {0}")]
    ToolMissing(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Marker prefixed to each attachment's content in the cleaned blob.
pub const ATTACHMENT_MARKER: &str = "[ATTACHMENT:";

/// Per-attachment processing record, kept for the audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct AttachmentMeta {
    pub filename: String,
    pub mime: String,
    pub size_bytes: usize,
    pub text_chars: usize,
    pub ocr_used: bool,
    /// True when the T&C reducer replaced the content with an excerpt.
    pub reduced: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_reason: Option<String>,
}

/// Output of the cleaner: a single text blob with attachment markers,
/// plus metadata about what happened to each part.
#[derive(Debug, Clone)]
pub struct CleanedMessage {
    pub text: String,
    pub attachments: Vec<AttachmentMeta>,
    pub ocr_used: bool,
    /// Nothing textual survived cleaning; the message must be flagged.
    pub empty_content: bool,
}
