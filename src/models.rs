//! Core data models used throughout the pipeline.
//!
//! These types represent the queries, retrieved chunks, and validation
//! outcomes that flow through retrieval, aggregation, and grounding.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Maximum query length in characters.
pub const MAX_QUERY_CHARS: usize = 2000;
/// Maximum selected-text length in characters.
pub const MAX_SELECTED_TEXT_CHARS: usize = 5000;

/// A validated, immutable user query.
///
/// Construct with [`Query::new`]; the text is guaranteed non-empty after
/// trimming. Optional parameters are attached with the `with_*` builders.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    text: String,
    selected_text: Option<String>,
    session_id: Option<String>,
    top_k: Option<usize>,
    threshold: Option<f64>,
    reuse_selection: bool,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        check_query_text(&text)?;
        Ok(Self {
            text,
            selected_text: None,
            session_id: None,
            top_k: None,
            threshold: None,
            reuse_selection: false,
        })
    }

    /// Attach highlighted text. Whitespace-only selections are dropped.
    pub fn with_selected_text(mut self, selected: Option<String>) -> Result<Self> {
        self.selected_text = normalize_selected_text(selected)?;
        Ok(self)
    }

    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_top_k(mut self, top_k: Option<usize>) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_threshold(mut self, threshold: Option<f64>) -> Self {
        self.threshold = threshold;
        self
    }

    /// Opt in to reusing the previous turn's selection when this query
    /// carries none of its own.
    pub fn with_reuse_selection(mut self, reuse: bool) -> Self {
        self.reuse_selection = reuse;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn selected_text(&self) -> Option<&str> {
        self.selected_text.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn top_k(&self) -> Option<usize> {
        self.top_k
    }

    pub fn threshold(&self) -> Option<f64> {
        self.threshold
    }

    pub fn reuse_selection(&self) -> bool {
        self.reuse_selection
    }
}

/// Check query text: non-empty after trimming, bounded length, no stray
/// control characters.
pub fn check_query_text(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(PipelineError::EmptyQuery);
    }
    check_content("query", text, MAX_QUERY_CHARS)
}

/// Normalize an optional selection: trims to `None` when blank, checks
/// length and characters otherwise.
pub fn normalize_selected_text(selected: Option<String>) -> Result<Option<String>> {
    match selected {
        Some(s) if !s.trim().is_empty() => {
            check_content("selected_text", &s, MAX_SELECTED_TEXT_CHARS)?;
            Ok(Some(s))
        }
        _ => Ok(None),
    }
}

fn check_content(field: &'static str, content: &str, max_chars: usize) -> Result<()> {
    let len = content.chars().count();
    if len > max_chars {
        return Err(PipelineError::InvalidQuery {
            field,
            reason: format!("length {} exceeds {} characters", len, max_chars),
        });
    }
    if content
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
    {
        return Err(PipelineError::InvalidQuery {
            field,
            reason: "contains control characters".to_string(),
        });
    }
    Ok(())
}

/// Source metadata attached to every indexed chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Source URI of the page the chunk was cut from.
    pub source: String,
    pub section: Option<String>,
    pub module: Option<String>,
    pub chapter: Option<String>,
}

/// A retrieved unit of corpus content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    /// Similarity score as reported by the corpus index.
    pub score: f64,
    pub metadata: ChunkMetadata,
}

/// Chunks returned for a query, ordered by score descending.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub query: String,
    pub chunks: Vec<Chunk>,
}

impl RetrievalResult {
    pub fn empty(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            chunks: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// True when scores are non-increasing across the sequence.
    pub fn is_ordered(&self) -> bool {
        self.chunks.windows(2).all(|w| w[0].score >= w[1].score)
    }

    pub fn top_score(&self) -> Option<f64> {
        self.chunks.first().map(|c| c.score)
    }
}

/// Answerability decision for a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Distinct sources of the chunks that passed the threshold.
    pub relevant_sources: BTreeSet<String>,
}

impl ValidationOutcome {
    /// The "nothing supports this" outcome.
    pub fn unsupported() -> Self {
        Self {
            is_valid: false,
            confidence: 0.0,
            relevant_sources: BTreeSet::new(),
        }
    }
}

/// One recorded exchange in a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub query: String,
    pub selected_text: Option<String>,
    pub outcome: ValidationOutcome,
    pub at: DateTime<Utc>,
}

/// Snapshot of a conversation's short-lived state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub id: String,
    pub turns: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl Session {
    /// Selection attached to the immediately previous turn, if any.
    pub fn previous_selection(&self) -> Option<&str> {
        self.turns.last().and_then(|t| t.selected_text.as_deref())
    }
}
