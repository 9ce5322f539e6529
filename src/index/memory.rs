//! In-memory [`CorpusIndex`] for tests and offline runs.
//!
//! Uses a `Vec` behind `std::sync::RwLock` for thread safety. Search is
//! brute-force cosine similarity over all stored vectors; ties keep
//! insertion order. A stored vector whose dimension differs from the
//! query embedding fails the search rather than being skipped.

use std::sync::{PoisonError, RwLock};

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::warn;

use crate::models::ChunkMetadata;

use super::{cosine_similarity, CorpusIndex, IndexHit};

struct StoredChunk {
    chunk_id: String,
    content: String,
    metadata: ChunkMetadata,
    vector: Vec<f32>,
}

/// In-memory corpus index.
pub struct InMemoryIndex {
    chunks: RwLock<Vec<StoredChunk>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
        }
    }

    /// Insert or replace a chunk and its embedding.
    pub fn upsert(
        &self,
        chunk_id: impl Into<String>,
        content: impl Into<String>,
        metadata: ChunkMetadata,
        vector: Vec<f32>,
    ) {
        let chunk_id = chunk_id.into();
        let mut chunks = self.chunks.write().unwrap_or_else(PoisonError::into_inner);
        let stored = StoredChunk {
            chunk_id: chunk_id.clone(),
            content: content.into(),
            metadata,
            vector,
        };
        match chunks.iter_mut().find(|c| c.chunk_id == chunk_id) {
            Some(existing) => *existing = stored,
            None => chunks.push(stored),
        }
    }

    pub fn len(&self) -> usize {
        self.chunks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CorpusIndex for InMemoryIndex {
    fn name(&self) -> &str {
        "memory"
    }

    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<IndexHit>> {
        if embedding.is_empty() {
            bail!("query embedding is empty");
        }
        let chunks = self.chunks.read().unwrap_or_else(PoisonError::into_inner);

        if let Some(stored) = chunks.iter().find(|c| c.vector.len() != embedding.len()) {
            warn!(
                chunk_id = %stored.chunk_id,
                stored_dim = stored.vector.len(),
                query_dim = embedding.len(),
                "embedding dimension mismatch"
            );
            bail!(
                "embedding dimension mismatch: query has {}, chunk '{}' has {}",
                embedding.len(),
                stored.chunk_id,
                stored.vector.len()
            );
        }

        let mut hits: Vec<IndexHit> = chunks
            .iter()
            .map(|c| IndexHit {
                chunk_id: c.chunk_id.clone(),
                score: cosine_similarity(embedding, &c.vector) as f64,
                content: c.content.clone(),
                metadata: c.metadata.clone(),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        Ok(hits)
    }
}
