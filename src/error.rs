//! Failure taxonomy for the retrieval and grounding pipeline.
//!
//! Stage-local invariants (non-empty text, argument ranges, confidence
//! bounds) are checked at each stage boundary and reported as a
//! [`PipelineError`] immediately. Only [`PipelineError::RetrievalUnavailable`]
//! is transient; callers may retry it at a higher layer; the pipeline
//! itself never retries.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Pipeline stage names used in error context and log fields.
pub mod stage {
    pub const EMBED: &str = "embed";
    pub const SEARCH: &str = "search";
    pub const RETRIEVE: &str = "retrieve";
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The query has no content after trimming. Raised before any
    /// outbound call is made.
    #[error("query must not be empty")]
    EmptyQuery,

    /// The query or selected text failed a format check.
    #[error("invalid {field}: {reason}")]
    InvalidQuery { field: &'static str, reason: String },

    /// A caller-supplied parameter is out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The corpus index or embedding provider could not be reached,
    /// returned an error, or timed out.
    #[error("retrieval unavailable during {stage} for query '{query}': {reason}")]
    RetrievalUnavailable {
        stage: &'static str,
        query: String,
        reason: String,
    },

    /// A confidence value outside `[0, 1]` reached the validator.
    #[error("confidence out of range [0, 1]: {0}")]
    ConfidenceOutOfRange(f64),

    /// A session id that is not a well-formed opaque identifier.
    #[error("invalid session id: {0}")]
    InvalidSessionId(String),
}

impl PipelineError {
    pub fn retrieval_unavailable(
        stage: &'static str,
        query: &str,
        reason: impl std::fmt::Display,
    ) -> Self {
        PipelineError::RetrievalUnavailable {
            stage,
            query: truncate_for_log(query),
            reason: format!("{:#}", reason),
        }
    }

    /// True for failures a caller may reasonably retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::RetrievalUnavailable { .. })
    }

    /// Stage the failure belongs to, for reports and log fields.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::EmptyQuery
            | PipelineError::InvalidQuery { .. }
            | PipelineError::InvalidArgument(_) => "input",
            PipelineError::RetrievalUnavailable { stage, .. } => stage,
            PipelineError::ConfidenceOutOfRange(_) => "grounding",
            PipelineError::InvalidSessionId(_) => "session",
        }
    }
}

/// First 50 characters of a query, with an ellipsis when cut.
pub fn truncate_for_log(text: &str) -> String {
    const MAX: usize = 50;
    match text.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_retrieval_is_transient() {
        let err = PipelineError::retrieval_unavailable(stage::SEARCH, "q", "timed out");
        assert!(err.is_transient());
        assert!(!PipelineError::EmptyQuery.is_transient());
        assert!(!PipelineError::ConfidenceOutOfRange(1.5).is_transient());
    }

    #[test]
    fn test_error_message_carries_stage_and_query() {
        let err = PipelineError::retrieval_unavailable(stage::EMBED, "What is ROS 2?", "503");
        let msg = err.to_string();
        assert!(msg.contains("embed"));
        assert!(msg.contains("What is ROS 2?"));
        assert_eq!(err.stage(), "embed");
    }

    #[test]
    fn test_truncate_for_log() {
        assert_eq!(truncate_for_log("short"), "short");
        let long = "x".repeat(80);
        let cut = truncate_for_log(&long);
        assert_eq!(cut.len(), 53);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn test_truncate_multibyte_boundary() {
        let text = "é".repeat(60);
        let cut = truncate_for_log(&text);
        assert_eq!(cut.chars().count(), 53);
    }
}
