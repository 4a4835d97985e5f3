pub mod http;
pub mod mock;

pub use http::HttpLlm;
pub use mock::{FailThenSucceedLlm, MockEmbedder, MockLlm, StaticEmbedder};

use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM endpoint unreachable at {0}")]
    Connection(String),

    #[error("LLM request timed out after {0}s")]
    Timeout(u64),

    #[error("LLM returned error (status {status}): {body}")]
    Http { status: u16, body: String },

    #[error("LLM response decode error: {0}")]
    Decode(String),

    #[error("No response scripted for prompt")]
    Exhausted,
}

impl LlmError {
    /// Rate limits, 5xx and network failures are retried with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Connection(_) | LlmError::Timeout(_) => true,
            LlmError::Http { status, .. } => *status == 429 || (500..=599).contains(status),
            _ => false,
        }
    }
}

/// Sampling parameters for a completion call.
#[derive(Debug, Clone)]
pub struct LlmParams {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for LlmParams {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: None,
        }
    }
}

/// Completion under a declarative JSON schema. The provider returns the
/// parsed JSON value; schema conformance is still validated by callers.
pub trait LlmClient: Send + Sync {
    fn complete(&self, prompt: &str, schema: &Value, params: &LlmParams) -> Result<Value, LlmError>;
}

/// Batch text embedding.
pub trait EmbeddingClient: Send + Sync {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError>;
}
