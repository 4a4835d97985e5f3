//! Scripted LLM and embedding mocks for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde_json::Value;

use super::{EmbeddingClient, LlmClient, LlmError, LlmParams};

/// Mock LLM client — pops scripted responses in order and records the
/// prompts it was called with.
pub struct MockLlm {
    responses: Mutex<VecDeque<Value>>,
    prompts: Mutex<Vec<String>>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_response(response: Value) -> Self {
        let mock = Self::new();
        mock.push_response(response);
        mock
    }

    pub fn push_response(&self, response: Value) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

impl Default for MockLlm {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmClient for MockLlm {
    fn complete(&self, prompt: &str, _schema: &Value, _params: &LlmParams) -> Result<Value, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(LlmError::Exhausted)
    }
}

/// Fails with a transient error `fail_count` times, then answers from the
/// scripted queue.
pub struct FailThenSucceedLlm {
    fail_count: Mutex<u32>,
    inner: MockLlm,
}

impl FailThenSucceedLlm {
    pub fn new(fail_count: u32, response: Value) -> Self {
        Self {
            fail_count: Mutex::new(fail_count),
            inner: MockLlm::with_response(response),
        }
    }
}

impl LlmClient for FailThenSucceedLlm {
    fn complete(&self, prompt: &str, schema: &Value, params: &LlmParams) -> Result<Value, LlmError> {
        let mut remaining = self.fail_count.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(LlmError::Http {
                status: 503,
                body: "mock overload".into(),
            });
        }
        drop(remaining);
        self.inner.complete(prompt, schema, params)
    }
}

/// Deterministic embedding mock: hash-derived unit vectors, so identical
/// texts embed identically and the cosine math is exercised for real.
pub struct MockEmbedder {
    dimension: usize,
    fail: Mutex<bool>,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self {
            dimension: 64,
            fail: Mutex::new(false),
        }
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingClient for MockEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        if *self.fail.lock().unwrap() {
            return Err(LlmError::Connection("mock embedder down".into()));
        }
        Ok(texts
            .iter()
            .map(|t| deterministic_vector(t, self.dimension))
            .collect())
    }
}

/// Generate a deterministic unit vector from text.
fn deterministic_vector(text: &str, dim: usize) -> Vec<f32> {
    let bytes = text.as_bytes();
    let mut vec = vec![0.0f32; dim];
    for (i, slot) in vec.iter_mut().enumerate() {
        let byte_idx = i % bytes.len().max(1);
        *slot = (bytes.get(byte_idx).copied().unwrap_or(0) as f32 + i as f32) / 255.0;
    }

    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in &mut vec {
            *val /= norm;
        }
    }
    vec
}

/// Embedder with explicitly registered text → vector mappings, for tests
/// that need controlled similarities. Unregistered texts map to a fixed
/// orthogonal fallback axis.
pub struct StaticEmbedder {
    vectors: Mutex<HashMap<String, Vec<f32>>>,
    dimension: usize,
}

impl StaticEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            vectors: Mutex::new(HashMap::new()),
            dimension,
        }
    }

    pub fn register(&self, text: &str, vector: Vec<f32>) {
        assert_eq!(vector.len(), self.dimension, "vector dimension mismatch");
        self.vectors.lock().unwrap().insert(text.to_string(), vector);
    }
}

impl EmbeddingClient for StaticEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let vectors = self.vectors.lock().unwrap();
        Ok(texts
            .iter()
            .map(|t| {
                vectors.get(t).cloned().unwrap_or_else(|| {
                    let mut v = vec![0.0; self.dimension];
                    v[self.dimension - 1] = 1.0;
                    v
                })
            })
            .collect())
    }
}
