//! Product embedding index with an mtime-keyed binary cache.
//!
//! All product search texts are embedded once per catalog version. The
//! cache file name carries the catalog file's modification time, so a
//! catalog change (sync) invalidates the cache by construction. Stale
//! index files are removed when a new one is written.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use crate::catalog::CatalogStore;
use crate::llm::EmbeddingClient;
use crate::models::Product;

use super::search_text::product_search_text;
use super::MatchError;

/// Embedding batch size per provider call.
const EMBED_BATCH: usize = 64;

#[derive(Debug, Serialize, Deserialize)]
pub struct EmbeddingIndex {
    product_ids: Vec<i64>,
    vectors: Vec<Vec<f32>>,
}

impl EmbeddingIndex {
    /// Embed all product search texts.
    pub fn build(
        products: &[Product],
        embedder: &dyn EmbeddingClient,
    ) -> Result<Self, MatchError> {
        let texts: Vec<String> = products.iter().map(product_search_text).collect();
        let mut vectors = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(EMBED_BATCH) {
            vectors.extend(embedder.embed(chunk)?);
        }

        tracing::info!(products = products.len(), "Embedding index built");
        Ok(Self {
            product_ids: products.iter().map(|p| p.id).collect(),
            vectors,
        })
    }

    /// Load the cache for the current catalog mtime, or build and cache.
    pub fn load_or_build(
        store: &CatalogStore,
        embedder: &dyn EmbeddingClient,
        embeddings_dir: &Path,
    ) -> Result<Arc<Self>, MatchError> {
        let cache_path = Self::cache_path(store, embeddings_dir);

        if let Some(path) = &cache_path {
            if path.exists() {
                match Self::read_cache(path) {
                    Ok(index) => {
                        tracing::info!(path = %path.display(), "Embedding index loaded from cache");
                        return Ok(Arc::new(index));
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Embedding cache unreadable — rebuilding");
                    }
                }
            }
        }

        let snapshot = store.snapshot();
        let index = Self::build(snapshot.all_products(), embedder)?;

        if let Some(path) = &cache_path {
            if let Err(e) = index.write_cache(path, embeddings_dir) {
                tracing::warn!(error = %e, "Failed to persist embedding cache");
            }
        }
        Ok(Arc::new(index))
    }

    fn cache_path(store: &CatalogStore, embeddings_dir: &Path) -> Option<PathBuf> {
        let mtime = store.products_mtime()?;
        let secs = mtime.duration_since(UNIX_EPOCH).ok()?.as_secs();
        Some(embeddings_dir.join(format!("index_{secs}.bin")))
    }

    fn read_cache(path: &Path) -> Result<Self, MatchError> {
        let bytes = std::fs::read(path)?;
        bincode::deserialize(&bytes).map_err(|e| MatchError::Cache(e.to_string()))
    }

    fn write_cache(&self, path: &Path, embeddings_dir: &Path) -> Result<(), MatchError> {
        std::fs::create_dir_all(embeddings_dir)?;

        // Drop indexes for older catalog versions.
        if let Ok(entries) = std::fs::read_dir(embeddings_dir) {
            for entry in entries.flatten() {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if name.starts_with("index_") && name.ends_with(".bin") {
                    let _ = std::fs::remove_file(entry.path());
                }
            }
        }

        let bytes = bincode::serialize(self).map_err(|e| MatchError::Cache(e.to_string()))?;
        crate::fsio::write_atomic(path, &bytes).map_err(|e| MatchError::Cache(e.to_string()))?;
        tracing::info!(path = %path.display(), "Embedding index cached");
        Ok(())
    }

    /// Cosine top-K against the product matrix, keeping candidates at or
    /// above the similarity floor.
    pub fn top_k(&self, query: &[f32], k: usize, floor: f32) -> Vec<(i64, f32)> {
        let mut scored: Vec<(i64, f32)> = self
            .product_ids
            .iter()
            .zip(&self.vectors)
            .map(|(&id, vector)| (id, cosine_similarity(query, vector)))
            .filter(|(_, score)| *score >= floor)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    pub fn is_empty(&self) -> bool {
        self.product_ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.product_ids.len()
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
