pub mod alerts;
pub mod digest;
pub mod gateway;

pub use alerts::*;
pub use digest::*;
pub use gateway::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Chat gateway unreachable: {0}")]
    Connection(String),

    #[error("Chat gateway error (status {status}): {body}")]
    Http { status: u16, body: String },

    #[error("Gateway response decode error: {0}")]
    Decode(String),

    #[error("Notification state error: {0}")]
    State(String),
}
