//! The extractor: one LLM call per message, schema-validated, with a
//! single bounded repair attempt.
//!
//! The flow is a small state machine:
//! `Call → Validate → { Accept | Repair(once) → Call → Validate → { Accept | Fail } }`.

use std::sync::{Arc, Mutex};

use crate::llm::{LlmClient, LlmParams};
use crate::models::{Extraction, TrainingExample};

use super::prompt::{
    build_extraction_prompt, build_repair_prompt, extraction_schema, PromptExample,
};
use super::validate::{validate_extraction, ValidationContext};
use super::ExtractionError;

/// How many few-shot examples the prompt carries at most.
const MAX_PROMPT_EXAMPLES: usize = 5;

/// Input excerpt length kept per few-shot example.
const EXAMPLE_EXCERPT_CHARS: usize = 600;

pub struct Extractor {
    llm: Arc<dyn LlmClient>,
    own_company_aliases: Vec<String>,
    generic_nouns: Vec<String>,
    /// Few-shot examples, refreshed by [`Extractor::retrain_with`].
    examples: Mutex<Vec<PromptExample>>,
}

impl Extractor {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        own_company_aliases: Vec<String>,
        generic_nouns: Vec<String>,
    ) -> Self {
        Self {
            llm,
            own_company_aliases,
            generic_nouns,
            examples: Mutex::new(Vec::new()),
        }
    }

    /// Extract structured intent from one cleaned message.
    pub fn extract(&self, cleaned_text: &str, sender: &str) -> Result<Extraction, ExtractionError> {
        if cleaned_text.trim().is_empty() {
            return Err(ExtractionError::EmptyInput);
        }

        let schema = extraction_schema();
        let params = LlmParams::default();
        let examples = self.examples.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let ctx = ValidationContext {
            sender,
            cleaned_text,
            own_company_aliases: &self.own_company_aliases,
            generic_nouns: &self.generic_nouns,
        };

        let prompt = build_extraction_prompt(cleaned_text, sender, &examples);
        let first = self.llm.complete(&prompt, &schema, &params)?;

        let complaints = match validate_extraction(&first, &ctx) {
            Ok(extraction) => return Ok(extraction),
            Err(complaints) => complaints,
        };

        tracing::info!(
            complaints = complaints.len(),
            "Extraction rejected by validator — one repair attempt"
        );

        let repair = build_repair_prompt(cleaned_text, sender, &first, &complaints);
        let second = self.llm.complete(&repair, &schema, &params)?;

        validate_extraction(&second, &ctx).map_err(|complaints| {
            tracing::warn!(
                complaints = complaints.len(),
                "Extraction repair failed — surfacing schema violation"
            );
            ExtractionError::SchemaViolation { complaints }
        })
    }

    /// Refresh the few-shot prompt examples from the training store.
    ///
    /// Bounded and synchronous: the highest-weight examples become the
    /// prompt's example block. Returns how many are now active.
    pub fn retrain_with(&self, training: &[TrainingExample]) -> usize {
        let mut sorted: Vec<&TrainingExample> = training.iter().collect();
        sorted.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal));

        let refreshed: Vec<PromptExample> = sorted
            .into_iter()
            .take(MAX_PROMPT_EXAMPLES)
            .map(|ex| PromptExample {
                input_excerpt: ex.input.chars().take(EXAMPLE_EXCERPT_CHARS).collect(),
                expected_json: ex.expected_output.clone(),
            })
            .collect();

        let count = refreshed.len();
        *self.examples.lock().unwrap_or_else(|e| e.into_inner()) = refreshed;
        tracing::info!(examples = count, "Extractor refreshed from training store");
        count
    }

    pub fn active_example_count(&self) -> usize {
        self.examples.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
