//! Answerability decision from aggregated confidence.
//!
//! Pure and deterministic: the same confidence, chunks, and threshold
//! always yield the same [`ValidationOutcome`]. Sources are collected
//! into a sorted set so the outcome compares equal regardless of chunk
//! order.

use std::collections::BTreeSet;

use crate::aggregate::Aggregation;
use crate::config::check_unit;
use crate::error::{PipelineError, Result};
use crate::models::{Chunk, ValidationOutcome};

/// Decide whether a query is answerable.
///
/// `is_valid = confidence >= is_valid_threshold`. Empty `source`
/// metadata is not reported as a source.
pub fn validate(
    confidence: f64,
    chunks: &[Chunk],
    is_valid_threshold: f64,
) -> Result<ValidationOutcome> {
    if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
        return Err(PipelineError::ConfidenceOutOfRange(confidence));
    }
    check_unit("is_valid_threshold", is_valid_threshold)?;

    let relevant_sources: BTreeSet<String> = chunks
        .iter()
        .map(|c| c.metadata.source.trim())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();

    Ok(ValidationOutcome {
        is_valid: confidence >= is_valid_threshold,
        confidence,
        relevant_sources,
    })
}

/// Convenience wrapper over [`validate`] for an [`Aggregation`].
pub fn validate_aggregation(agg: &Aggregation, is_valid_threshold: f64) -> Result<ValidationOutcome> {
    validate(agg.confidence, &agg.chunks, is_valid_threshold)
}
