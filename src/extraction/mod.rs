pub mod extractor;
pub mod prompt;
pub mod validate;

pub use extractor::*;
pub use prompt::*;
pub use validate::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("LLM call failed: {0}")]
    Llm(#[from] crate::llm::LlmError),

    #[error("Extraction schema violations after repair: {}", complaints.join("; "))]
    SchemaViolation { complaints: Vec<String> },

    #[error("Nothing to extract: cleaned message is empty")]
    EmptyInput,
}
