pub mod client;
pub mod order_writer;
pub mod verifier;

pub use client::*;
pub use order_writer::*;
pub use verifier::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ErpError {
    #[error("ERP endpoint unreachable at {0}")]
    Connection(String),

    #[error("ERP transport error: {0}")]
    Transport(String),

    #[error("ERP returned error (status {status}): {body}")]
    Http { status: u16, body: String },

    #[error("ERP RPC fault: {0}")]
    Rpc(String),

    #[error("ERP authentication failed for database {0}")]
    Auth(String),

    #[error("ERP response decode error: {0}")]
    Decode(String),
}

impl ErpError {
    /// Whether the failure is worth retrying (network-shaped) as opposed
    /// to a protocol or schema problem.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErpError::Connection(_) | ErpError::Transport(_) | ErpError::Http { status: 500..=599, .. }
        )
    }
}
