pub mod maildir;
pub mod mock;

pub use maildir::MaildirMailbox;
pub use mock::MockMailbox;

use chrono::NaiveDateTime;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MailboxError {
    #[error("Message not found: {0}")]
    NotFound(String),

    #[error("Message parse error in {id}: {message}")]
    Parse { id: String, message: String },

    #[error("Mailbox I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A decoded attachment part.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// A fetched message, MIME already decoded.
#[derive(Debug, Clone)]
pub struct EmailMessage {
    /// Mailbox-level handle, also used to key the audit directory.
    pub message_id: String,
    pub from: String,
    pub subject: String,
    pub body_text: String,
    pub body_html: Option<String>,
    pub attachments: Vec<Attachment>,
    pub received_at: Option<NaiveDateTime>,
}

/// The narrow mailbox interface the supervisor consumes. The concrete
/// IMAP client is an external collaborator; the bundled production
/// implementation consumes a Maildir filled by any delivery agent.
pub trait Mailbox: Send + Sync {
    fn list_unread(&self) -> Result<Vec<String>, MailboxError>;
    fn fetch(&self, message_id: &str) -> Result<EmailMessage, MailboxError>;
    fn mark_read(&self, message_id: &str) -> Result<(), MailboxError>;
}
