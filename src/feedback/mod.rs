pub mod parser;
pub mod processor;
pub mod store;

pub use parser::*;
pub use processor::*;
pub use store::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedbackError {
    #[error("LLM call failed: {0}")]
    Llm(#[from] crate::llm::LlmError),

    #[error("Feedback parse error: {0}")]
    Parse(String),

    #[error("No processing result found for {0}")]
    UnknownOrder(String),

    #[error("Could not resolve which order the correction refers to")]
    Unresolvable,

    #[error("Feedback store error: {0}")]
    Store(#[from] crate::fsio::FsError),
}
