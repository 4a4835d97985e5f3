pub mod confirmer;
pub mod dimensions;
pub mod index;
pub mod retriever;
pub mod search_text;

pub use confirmer::*;
pub use dimensions::*;
pub use index::*;
pub use retriever::*;
pub use search_text::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("Embedding provider failed: {0}")]
    Embedding(#[from] crate::llm::LlmError),

    #[error("Embedding cache error: {0}")]
    Cache(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
