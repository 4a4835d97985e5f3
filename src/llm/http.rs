//! OpenAI-compatible HTTP provider for completions and embeddings.
//!
//! Blocking client with per-call timeout; transient failures (429, 5xx,
//! network) are retried in-place with exponential backoff before the
//! error surfaces to the caller.

use std::time::Duration;

use rand::Rng;
use serde_json::{json, Value};

use super::{EmbeddingClient, LlmClient, LlmError, LlmParams};

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 500;

pub struct HttpLlm {
    base_url: String,
    api_key: Option<String>,
    model: String,
    embedding_model: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl HttpLlm {
    pub fn new(
        base_url: &str,
        api_key: Option<&str>,
        model: &str,
        embedding_model: &str,
        timeout_secs: u64,
    ) -> Result<Self, LlmError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| LlmError::Decode(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(str::to_string),
            model: model.to_string(),
            embedding_model: embedding_model.to_string(),
            client,
            timeout_secs,
        })
    }

    fn post(&self, path: &str, body: &Value) -> Result<Value, LlmError> {
        let url = format!("{}{path}", self.base_url);
        let mut last_err = None;

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let backoff = backoff_with_jitter(attempt);
                tracing::debug!(attempt, backoff_ms = backoff.as_millis() as u64, url = %url, "Retrying LLM call");
                std::thread::sleep(backoff);
            }

            match self.post_once(&url, body) {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt + 1 < MAX_ATTEMPTS => {
                    tracing::warn!(attempt = attempt + 1, error = %e, "Transient LLM failure");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or(LlmError::Exhausted))
    }

    fn post_once(&self, url: &str, body: &Value) -> Result<Value, LlmError> {
        let mut request = self.client.post(url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().map_err(|e| {
            if e.is_connect() {
                LlmError::Connection(self.base_url.clone())
            } else if e.is_timeout() {
                LlmError::Timeout(self.timeout_secs)
            } else {
                LlmError::Decode(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LlmError::Http {
                status: status.as_u16(),
                body,
            });
        }

        response.json().map_err(|e| LlmError::Decode(e.to_string()))
    }
}

impl LlmClient for HttpLlm {
    fn complete(&self, prompt: &str, schema: &Value, params: &LlmParams) -> Result<Value, LlmError> {
        let mut body = json!({
            "model": self.model,
            "temperature": params.temperature,
            "messages": [
                { "role": "user", "content": prompt }
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": { "name": "response", "schema": schema, "strict": true }
            },
        });
        if let Some(max) = params.max_tokens {
            body["max_tokens"] = json!(max);
        }

        let response = self.post("/chat/completions", &body)?;
        let content = response["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| LlmError::Decode("missing choices[0].message.content".into()))?;

        parse_json_content(content)
    }
}

impl EmbeddingClient for HttpLlm {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = json!({ "model": self.embedding_model, "input": texts });
        let response = self.post("/embeddings", &body)?;

        let data = response["data"]
            .as_array()
            .ok_or_else(|| LlmError::Decode("missing data array".into()))?;

        let mut vectors = Vec::with_capacity(data.len());
        for entry in data {
            let embedding = entry["embedding"]
                .as_array()
                .ok_or_else(|| LlmError::Decode("missing embedding".into()))?
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect();
            vectors.push(embedding);
        }

        if vectors.len() != texts.len() {
            return Err(LlmError::Decode(format!(
                "embedding count mismatch: sent {}, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }
}

/// Parse model output as JSON, tolerating a fenced ```json block.
pub fn parse_json_content(content: &str) -> Result<Value, LlmError> {
    let trimmed = content.trim();
    if let Ok(v) = serde_json::from_str(trimmed) {
        return Ok(v);
    }

    let lower = trimmed.to_lowercase();
    if let Some(start) = lower.find("```json") {
        let inner = &trimmed[start + 7..];
        if let Some(end) = inner.find("```") {
            return serde_json::from_str(inner[..end].trim())
                .map_err(|e| LlmError::Decode(format!("fenced JSON parse: {e}")));
        }
    }

    Err(LlmError::Decode(format!(
        "response is not JSON: {}",
        &trimmed.chars().take(120).collect::<String>()
    )))
}

fn backoff_with_jitter(attempt: u32) -> Duration {
    let base = BACKOFF_BASE_MS * 2u64.pow(attempt.min(6));
    let jitter = rand::thread_rng().gen_range(0..base / 2 + 1);
    Duration::from_millis(base + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_json() {
        let v = parse_json_content(r#"{"intent_type": "order_inquiry"}"#).unwrap();
        assert_eq!(v["intent_type"], "order_inquiry");
    }

    #[test]
    fn parses_fenced_json() {
        let v = parse_json_content("Here you go:\n```json\n{\"a\": 1}\n```\ndone").unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn rejects_non_json() {
        assert!(parse_json_content("I cannot help with that").is_err());
    }

    #[test]
    fn backoff_grows_with_attempts() {
        let b1 = backoff_with_jitter(1);
        let b3 = backoff_with_jitter(3);
        assert!(b1.as_millis() >= 1000);
        assert!(b3.as_millis() >= 4000);
    }

    #[test]
    fn transient_classification() {
        assert!(LlmError::Http { status: 429, body: String::new() }.is_transient());
        assert!(LlmError::Http { status: 503, body: String::new() }.is_transient());
        assert!(!LlmError::Http { status: 400, body: String::new() }.is_transient());
        assert!(LlmError::Timeout(30).is_transient());
        assert!(!LlmError::Decode("x".into()).is_transient());
    }
}
