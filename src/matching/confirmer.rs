//! Match confirmation: auto-accept above the threshold (or on an exact
//! code), otherwise ask the LLM to choose among the top candidates.
//!
//! Review policy: any committed choice below `auto_threshold` carries
//! `requires_review`; a confirmer choice below `review_threshold` is not
//! committed at all and the line stays unmatched. A chosen product
//! therefore always has `confidence >= auto_threshold` or the review
//! flag set.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::catalog::Snapshot;
use crate::llm::{LlmClient, LlmParams};
use crate::models::{Candidate, LineItem, LineItemMatch, MatchMethod};

use super::retriever::RetrievedCandidate;
use super::search_text::query_search_text;

pub struct MatchConfirmer {
    llm: Arc<dyn LlmClient>,
    auto_threshold: f32,
    review_threshold: f32,
}

impl MatchConfirmer {
    pub fn new(llm: Arc<dyn LlmClient>, auto_threshold: f32, review_threshold: f32) -> Self {
        Self {
            llm,
            auto_threshold,
            review_threshold,
        }
    }

    /// Turn retrieved candidates into the final match record for one
    /// line item.
    pub fn confirm(
        &self,
        item: &LineItem,
        line_index: usize,
        retrieved: &[RetrievedCandidate],
        snapshot: &Snapshot,
    ) -> LineItemMatch {
        let candidates: Vec<Candidate> = retrieved
            .iter()
            .map(|c| Candidate {
                product_id: c.product_id,
                score: c.score,
                explain: c.explain.clone(),
            })
            .collect();

        let Some(top) = retrieved.first() else {
            return LineItemMatch::unmatched(line_index);
        };

        // Exact-code fast path and the auto threshold both skip the LLM.
        // An exact code whose dimension validation lowered the score
        // keeps its top position but gets the review flag.
        if top.method == MatchMethod::ExactCode || top.score >= self.auto_threshold {
            return LineItemMatch {
                line_index,
                candidates,
                chosen_product_id: Some(top.product_id),
                confidence: top.score,
                method: top.method,
                requires_review: top.score < self.auto_threshold,
            };
        }

        match self.ask_confirmer(item, retrieved, snapshot) {
            Ok(Some((chosen_id, confidence))) if confidence >= self.review_threshold => {
                LineItemMatch {
                    line_index,
                    candidates,
                    chosen_product_id: Some(chosen_id),
                    confidence,
                    method: MatchMethod::Confirmer,
                    requires_review: confidence < self.auto_threshold,
                }
            }
            // Below the review threshold the choice is not committed.
            Ok(Some((_, confidence))) => LineItemMatch {
                line_index,
                candidates,
                chosen_product_id: None,
                confidence,
                method: MatchMethod::Unmatched,
                requires_review: true,
            },
            Ok(None) => LineItemMatch {
                line_index,
                candidates,
                chosen_product_id: None,
                confidence: 0.0,
                method: MatchMethod::Unmatched,
                requires_review: true,
            },
            Err(e) => {
                tracing::warn!(line_index, error = %e, "Confirmer call failed — flagging for review");
                LineItemMatch {
                    line_index,
                    candidates,
                    chosen_product_id: None,
                    confidence: top.score,
                    method: top.method,
                    requires_review: true,
                }
            }
        }
    }

    fn ask_confirmer(
        &self,
        item: &LineItem,
        retrieved: &[RetrievedCandidate],
        snapshot: &Snapshot,
    ) -> Result<Option<(i64, f32)>, crate::llm::LlmError> {
        let schema = json!({
            "type": "object",
            "properties": {
                "chosen_product_id": { "type": ["integer", "null"] },
                "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
                "rationale": { "type": "string" }
            },
            "required": ["chosen_product_id", "confidence"]
        });

        let listing: String = retrieved
            .iter()
            .map(|c| {
                let detail = snapshot
                    .product_by_id(c.product_id)
                    .map(|p| {
                        format!(
                            "code={} name={}",
                            p.trimmed_code().unwrap_or("-"),
                            p.name
                        )
                    })
                    .unwrap_or_else(|| "unknown".into());
                format!("- id {}: {detail} (score {:.2})", c.product_id, c.score)
            })
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "A customer ordered this line item:\n{}\n\nCandidate products:\n{listing}\n\n\
Pick the candidate id that is the same article, or null if none of them is. \
Return JSON with chosen_product_id, confidence (0-1) and a one-sentence rationale.",
            query_search_text(item)
        );

        let response = self
            .llm
            .complete(&prompt, &schema, &LlmParams::default())?;

        let chosen = match response.get("chosen_product_id") {
            Some(Value::Number(n)) => n.as_i64(),
            _ => None,
        };
        let confidence = response
            .get("confidence")
            .and_then(Value::as_f64)
            .map(|c| c.clamp(0.0, 1.0) as f32)
            .unwrap_or(0.0);

        if let Some(rationale) = response.get("rationale").and_then(Value::as_str) {
            tracing::debug!(rationale, "Confirmer rationale");
        }

        match chosen {
            Some(id) if retrieved.iter().any(|c| c.product_id == id) => {
                Ok(Some((id, confidence)))
            }
            Some(id) => {
                tracing::warn!(id, "Confirmer chose an id outside the candidate set");
                Ok(None)
            }
            None => Ok(None),
        }
    }
}
