//! Score aggregation: threshold filtering and query-level confidence.
//!
//! # Confidence Formula
//!
//! 1. Keep chunks with `score >= threshold` (order preserved).
//! 2. Clamp surviving scores to `[0, 1]`: `s_0 >= s_1 >= ...`.
//! 3. Combine with a decayed noisy-OR:
//!
//! ```text
//! confidence = 1 - Π_i (1 - s_i × 0.5^i)
//! ```
//!
//! A single chunk yields exactly its score; each further chunk can only
//! raise confidence, by less the further down it ranks. Confidence is
//! non-decreasing in every surviving score, `0.0` when nothing survives,
//! and always within `[0, 1]`.

use serde::Serialize;

use crate::config::check_unit;
use crate::error::Result;
use crate::models::{Chunk, RetrievalResult};

/// Weight multiplier applied per rank below the top chunk.
pub const SUPPORT_DECAY: f64 = 0.5;

/// Chunks that passed the threshold plus the combined confidence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregation {
    pub chunks: Vec<Chunk>,
    pub confidence: f64,
}

impl Aggregation {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Filter `result` by `threshold` and compute its confidence.
///
/// An empty result, or one where every chunk falls below the threshold,
/// is a normal zero-confidence outcome, not an error. Only a malformed
/// threshold is rejected.
pub fn aggregate(result: &RetrievalResult, threshold: f64) -> Result<Aggregation> {
    check_unit("threshold", threshold)?;

    let chunks: Vec<Chunk> = result
        .chunks
        .iter()
        .filter(|c| c.score >= threshold)
        .cloned()
        .collect();

    let confidence = combine_scores(chunks.iter().map(|c| c.score));
    Ok(Aggregation { chunks, confidence })
}

/// Decayed noisy-OR over scores given best first.
pub fn combine_scores(scores: impl IntoIterator<Item = f64>) -> f64 {
    let mut miss = 1.0;
    let mut weight = 1.0;
    for s in scores {
        let s = if s.is_finite() { s.clamp(0.0, 1.0) } else { 0.0 };
        miss *= 1.0 - s * weight;
        weight *= SUPPORT_DECAY;
    }
    (1.0 - miss).clamp(0.0, 1.0)
}
