//! The operations exposed to the CLI and HTTP layers.
//!
//! Each call runs the stages in order on the caller's task:
//!
//! ```text
//! session merge → Retriever → aggregate → validate → session append
//! ```
//!
//! Nothing here retries; a failed stage returns its [`PipelineError`]
//! to the caller unchanged.

use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use tracing::info;

use crate::aggregate::aggregate;
use crate::config::{Config, PipelineConfig};
use crate::embedding::create_provider;
use crate::error::{truncate_for_log, Result};
use crate::grounding::validate_aggregation;
use crate::harness::{self, default_cases, load_cases, Report, ValidationTestCase};
use crate::index::create_index;
use crate::models::{normalize_selected_text, Query, RetrievalResult, ValidationOutcome};
use crate::retriever::Retriever;
use crate::session::{SessionStore, SystemClock};

/// Result of a session-aware query.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub session_id: String,
    pub result: RetrievalResult,
    pub outcome: ValidationOutcome,
}

pub struct Pipeline {
    retriever: Retriever,
    sessions: Arc<SessionStore>,
    config: PipelineConfig,
    cases: Vec<ValidationTestCase>,
    tolerance: f64,
}

impl Pipeline {
    pub fn new(retriever: Retriever, sessions: Arc<SessionStore>, config: PipelineConfig) -> Self {
        Self {
            retriever,
            sessions,
            config,
            cases: default_cases(),
            tolerance: harness::DEFAULT_TOLERANCE,
        }
    }

    /// Build the pipeline and its backends from a loaded config.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let pipeline_config = config.pipeline();
        pipeline_config.check()?;

        let embedder = create_provider(&config.embedding)?;
        let index = create_index(&config.index)?;
        let retriever = Retriever::new(
            Arc::from(embedder),
            Arc::from(index),
            config.retrieval_timeout(),
        );
        let sessions = Arc::new(SessionStore::from_config(
            &pipeline_config,
            Arc::new(SystemClock),
        ));

        let cases = match &config.validation.cases {
            Some(path) => load_cases(path)
                .with_context(|| "Failed to load [validation].cases")?,
            None => default_cases(),
        };

        Ok(Self::new(retriever, sessions, pipeline_config)
            .with_cases(cases)
            .with_tolerance(config.validation.tolerance))
    }

    /// Replace the cases used when a suite run supplies none.
    pub fn with_cases(mut self, cases: Vec<ValidationTestCase>) -> Self {
        self.cases = cases;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Answer a query within its session.
    ///
    /// The session is created when missing. A query without a selection
    /// is embedded on its own text unless it opts in with
    /// [`Query::with_reuse_selection`], in which case the previous turn's
    /// selection is used. The outcome is appended as a new turn.
    pub async fn query(&self, query: Query) -> Result<QueryResponse> {
        let cfg = self
            .config
            .with_overrides(query.top_k(), query.threshold())?;
        let session = self.sessions.get_or_create(query.session_id())?;

        let selected = match query.selected_text() {
            Some(sel) => Some(sel),
            None if query.reuse_selection() => session.previous_selection(),
            None => None,
        };
        let result = self.retriever.retrieve(query.text(), cfg.top_k, selected).await?;
        let agg = aggregate(&result, cfg.chunk_threshold)?;
        let outcome = validate_aggregation(&agg, cfg.validity_threshold)?;

        self.sessions
            .append_turn(&session.id, &query, outcome.clone())?;

        info!(
            session_id = %session.id,
            query = %truncate_for_log(query.text()),
            retrieved = result.len(),
            supporting = agg.chunks.len(),
            confidence = outcome.confidence,
            is_valid = outcome.is_valid,
            "query validated"
        );

        Ok(QueryResponse {
            session_id: session.id,
            result,
            outcome,
        })
    }

    /// Answerability of a query, without chunks and without a session.
    pub async fn validate(
        &self,
        query_text: &str,
        selected_text: Option<String>,
    ) -> Result<ValidationOutcome> {
        let query = Query::new(query_text)?;
        let selected = normalize_selected_text(selected_text)?;

        let result = self
            .retriever
            .retrieve(query.text(), self.config.top_k, selected.as_deref())
            .await?;
        let agg = aggregate(&result, self.config.chunk_threshold)?;
        validate_aggregation(&agg, self.config.validity_threshold)
    }

    /// Run the validation harness.
    ///
    /// Unset arguments fall back to the configured cases, tolerance, and
    /// `top_k`. With `verbose = false` the per-case rows are left out of
    /// the returned report; the summary values are identical either way.
    pub async fn run_validation_suite(
        &self,
        cases: Option<Vec<ValidationTestCase>>,
        tolerance: Option<f64>,
        top_k: Option<usize>,
        verbose: bool,
    ) -> Result<Report> {
        let cases = cases.unwrap_or_else(|| self.cases.clone());
        let report = harness::run(
            &self.retriever,
            &self.config,
            &cases,
            tolerance.unwrap_or(self.tolerance),
            top_k.unwrap_or(self.config.top_k),
        )
        .await?;

        Ok(if verbose {
            report
        } else {
            report.without_details()
        })
    }
}
