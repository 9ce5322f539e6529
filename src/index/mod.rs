//! Corpus index abstraction.
//!
//! The [`CorpusIndex`] trait is the read-only search seam between the
//! retriever and whatever vector backend holds the textbook chunks.
//! Implementations must return hits ordered by score descending and be
//! `Send + Sync` so one index can serve concurrent requests.
//!
//! | Backend | Module |
//! |---------|--------|
//! | Qdrant (REST) | [`qdrant`] |
//! | In-memory brute-force cosine | [`memory`] |

pub mod memory;
pub mod qdrant;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::IndexConfig;
use crate::models::{Chunk, ChunkMetadata};

pub use memory::InMemoryIndex;
pub use qdrant::QdrantIndex;

/// A single scored hit returned by a corpus index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub chunk_id: String,
    pub score: f64,
    pub content: String,
    pub metadata: ChunkMetadata,
}

impl From<IndexHit> for Chunk {
    fn from(hit: IndexHit) -> Self {
        Chunk {
            id: hit.chunk_id,
            content: hit.content,
            score: hit.score,
            metadata: hit.metadata,
        }
    }
}

/// Read-only nearest-neighbour search over corpus chunk embeddings.
#[async_trait]
pub trait CorpusIndex: Send + Sync {
    /// Backend label for logs (e.g. `"qdrant"`).
    fn name(&self) -> &str;

    /// Return up to `top_k` hits nearest to `embedding`, best first.
    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<IndexHit>>;
}

/// Create the configured [`CorpusIndex`] backend.
pub fn create_index(config: &IndexConfig) -> Result<Box<dyn CorpusIndex>> {
    match config.backend.as_str() {
        "qdrant" => Ok(Box::new(QdrantIndex::new(config)?)),
        "memory" => Ok(Box::new(InMemoryIndex::new())),
        other => bail!("Unknown index backend: {}", other),
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors or
/// vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
