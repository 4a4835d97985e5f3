//! Two-stage candidate retrieval per line item.
//!
//! Stage A filters the catalog by embedding cosine similarity; Stage B
//! refines with dimension-token overlap. A trimmed exact code match
//! short-circuits to the top regardless of semantic rank — dimension
//! validation can lower its reported confidence but never demote it.
//! Without a usable embedding path the retriever degrades to token-only
//! scoring; an empty result is a valid outcome, not an error.

use std::sync::Arc;

use crate::catalog::Snapshot;
use crate::llm::EmbeddingClient;
use crate::models::{LineItem, MatchMethod, Product};

use super::dimensions::{
    dimension_overlap, dimensions_conflict, extract_dimensions, DimensionSet,
};
use super::index::EmbeddingIndex;
use super::search_text::{product_search_text, query_search_text, token_similarity};

/// Exact-code score when the line item's dimensions contradict the
/// product's. Lower confidence, same top position.
const EXACT_CODE_DIM_CONFLICT_SCORE: f32 = 0.90;

/// Token-only candidates below this similarity are noise.
const TOKEN_FLOOR: f32 = 0.20;

#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    /// Stage A candidate count.
    pub top_k: usize,
    /// Final trimmed candidate count.
    pub final_k: usize,
    pub semantic_floor: f32,
    /// `k` in `semantic * (1 + k * dimension_overlap)`.
    pub dimension_boost: f32,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            top_k: 20,
            final_k: 5,
            semantic_floor: 0.60,
            dimension_boost: 0.5,
        }
    }
}

/// One scored candidate with its provenance.
#[derive(Debug, Clone)]
pub struct RetrievedCandidate {
    pub product_id: i64,
    pub score: f32,
    pub method: MatchMethod,
    pub explain: String,
}

pub struct CandidateRetriever {
    embedder: Arc<dyn EmbeddingClient>,
    config: RetrieverConfig,
}

impl CandidateRetriever {
    pub fn new(embedder: Arc<dyn EmbeddingClient>, config: RetrieverConfig) -> Self {
        Self { embedder, config }
    }

    /// Retrieve ordered candidates for one line item.
    pub fn retrieve(
        &self,
        item: &LineItem,
        snapshot: &Snapshot,
        index: Option<&EmbeddingIndex>,
    ) -> Vec<RetrievedCandidate> {
        let query_text = query_search_text(item);
        let query_dims = query_dimensions(item);

        let exact = self.exact_code_candidate(item, snapshot, &query_dims);

        let mut scored = match index.filter(|i| !i.is_empty()) {
            Some(index) => match self.semantic_candidates(&query_text, &query_dims, snapshot, index)
            {
                Ok(candidates) => candidates,
                Err(e) => {
                    tracing::warn!(error = %e, "Semantic retrieval failed — degrading to token-only");
                    self.token_candidates(&query_text, &query_dims, snapshot)
                }
            },
            None => self.token_candidates(&query_text, &query_dims, snapshot),
        };

        // Dedup by product id, keeping the best score.
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        let mut seen = std::collections::HashSet::new();
        scored.retain(|c| seen.insert(c.product_id));

        if let Some(exact) = exact {
            scored.retain(|c| c.product_id != exact.product_id);
            scored.insert(0, exact);
        }

        scored.truncate(self.config.final_k);
        scored
    }

    fn exact_code_candidate(
        &self,
        item: &LineItem,
        snapshot: &Snapshot,
        query_dims: &DimensionSet,
    ) -> Option<RetrievedCandidate> {
        let code = item.raw_code.as_deref()?.trim();
        if code.is_empty() {
            return None;
        }
        let product = snapshot.product_by_code(code)?;

        let product_dims = extract_dimensions(&product_search_text(product));
        let (score, explain) = if dimensions_conflict(query_dims, &product_dims) {
            (
                EXACT_CODE_DIM_CONFLICT_SCORE,
                format!("exact code {code}, dimension mismatch"),
            )
        } else {
            (1.0, format!("exact code {code}"))
        };

        Some(RetrievedCandidate {
            product_id: product.id,
            score,
            method: MatchMethod::ExactCode,
            explain,
        })
    }

    fn semantic_candidates(
        &self,
        query_text: &str,
        query_dims: &DimensionSet,
        snapshot: &Snapshot,
        index: &EmbeddingIndex,
    ) -> Result<Vec<RetrievedCandidate>, crate::llm::LlmError> {
        let query_vec = self
            .embedder
            .embed(std::slice::from_ref(&query_text.to_string()))?
            .into_iter()
            .next()
            .unwrap_or_default();

        let hits = index.top_k(&query_vec, self.config.top_k, self.config.semantic_floor);

        Ok(hits
            .into_iter()
            .filter_map(|(product_id, semantic)| {
                let product = snapshot.product_by_id(product_id)?;
                Some(self.refine(product, semantic, query_dims, MatchMethod::SemanticToken))
            })
            .collect())
    }

    fn token_candidates(
        &self,
        query_text: &str,
        query_dims: &DimensionSet,
        snapshot: &Snapshot,
    ) -> Vec<RetrievedCandidate> {
        let mut candidates: Vec<RetrievedCandidate> = snapshot
            .all_products()
            .iter()
            .filter_map(|product| {
                let sim = token_similarity(query_text, &product_search_text(product));
                (sim >= TOKEN_FLOOR)
                    .then(|| self.refine(product, sim, query_dims, MatchMethod::Token))
            })
            .collect();

        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(self.config.top_k);
        candidates
    }

    /// Stage B: boost the base similarity by dimension overlap.
    fn refine(
        &self,
        product: &Product,
        base: f32,
        query_dims: &DimensionSet,
        method: MatchMethod,
    ) -> RetrievedCandidate {
        let product_dims = extract_dimensions(&product_search_text(product));
        let overlap = dimension_overlap(query_dims, &product_dims);
        let score = (base * (1.0 + self.config.dimension_boost * overlap)).min(1.0);

        RetrievedCandidate {
            product_id: product.id,
            score,
            method,
            explain: format!("base {base:.2}, dim overlap {overlap:.2}"),
        }
    }
}

/// Attribute dimensions take precedence; the raw name fills the gaps.
fn query_dimensions(item: &LineItem) -> DimensionSet {
    let mut dims = DimensionSet::from(&item.attributes);
    let extracted = extract_dimensions(&item.raw_name);
    for dim in [
        super::dimensions::Dim::WidthMm,
        super::dimensions::Dim::HeightMm,
        super::dimensions::Dim::ThicknessMm,
        super::dimensions::Dim::LengthM,
    ] {
        if let Some(v) = extracted.get(dim) {
            dims.insert(dim, v);
        }
    }
    dims
}
