//! Regression harness for confidence outputs.
//!
//! Runs a set of [`ValidationTestCase`]s through retrieval, aggregation,
//! and grounding, and compares each actual outcome with the expected one:
//!
//! ```text
//! pass  ⇔  |actual_confidence - expected_confidence| <= tolerance
//!          ∧ actual_is_valid == expected_is_valid
//!          ∧ expected_sources ⊆ relevant_sources        (when listed)
//!          ∧ a second retrieval returns the same chunks
//! ```
//!
//! The second retrieval must return the same chunk ids in the same order
//! with every score within [`DETERMINISM_TOLERANCE`] of the first.
//!
//! Cases run sequentially with no retries. A case whose pipeline fails is
//! recorded as [`CaseStatus::Errored`] (counting as confidence `0.0`) and
//! the run moves on.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aggregate::aggregate;
use crate::config::PipelineConfig;
use crate::error::{truncate_for_log, PipelineError, Result};
use crate::grounding::validate_aggregation;
use crate::models::{RetrievalResult, ValidationOutcome};
use crate::retriever::Retriever;

/// Default allowed deviation between expected and actual confidence.
pub const DEFAULT_TOLERANCE: f64 = 0.05;

/// Largest per-chunk score drift allowed between two runs of one case.
pub const DETERMINISM_TOLERANCE: f64 = 0.01;

/// A fixed expectation for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationTestCase {
    pub query: String,
    pub expected_is_valid: bool,
    pub expected_confidence: f64,
    /// Sources that must all appear in the outcome's `relevant_sources`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_sources: Option<BTreeSet<String>>,
}

impl ValidationTestCase {
    pub fn new(query: impl Into<String>, expected_is_valid: bool, expected_confidence: f64) -> Self {
        Self {
            query: query.into(),
            expected_is_valid,
            expected_confidence,
            expected_sources: None,
        }
    }

    pub fn with_expected_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expected_sources = Some(sources.into_iter().map(Into::into).collect());
        self
    }
}

/// Built-in cases for the textbook corpus.
pub fn default_cases() -> Vec<ValidationTestCase> {
    vec![
        ValidationTestCase::new("What is ROS 2?", true, 0.97),
        ValidationTestCase::new("Explain URDF fundamentals", true, 0.90),
        ValidationTestCase::new("How to connect AI to robots?", true, 0.93),
    ]
}

/// Load cases from a JSON array.
pub fn load_cases(path: &Path) -> anyhow::Result<Vec<ValidationTestCase>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read validation cases: {}", path.display()))?;
    let cases: Vec<ValidationTestCase> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse validation cases: {}", path.display()))?;

    for (i, case) in cases.iter().enumerate() {
        if !(0.0..=1.0).contains(&case.expected_confidence) {
            anyhow::bail!(
                "case {} ('{}'): expected_confidence must be in [0.0, 1.0]",
                i,
                truncate_for_log(&case.query)
            );
        }
    }
    Ok(cases)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CaseStatus {
    Passed,
    /// Every unmet expectation, in check order.
    Failed { reasons: Vec<String> },
    /// The pipeline itself failed for this case.
    Errored { stage: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseResult {
    pub query: String,
    pub expected_is_valid: bool,
    pub expected_confidence: f64,
    pub actual_is_valid: bool,
    pub actual_confidence: f64,
    /// Score of the best retrieved chunk, before any threshold.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_score: Option<f64>,
    #[serde(flatten)]
    pub status: CaseStatus,
}

impl CaseResult {
    pub fn passed(&self) -> bool {
        self.status == CaseStatus::Passed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Passed,
    Failed,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Passed => write!(f, "PASSED"),
            Verdict::Failed => write!(f, "FAILED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    /// Per-case rows; empty when the report was requested without detail.
    pub cases: Vec<CaseResult>,
    pub total: usize,
    pub passed: usize,
    pub pass_rate: f64,
    /// Arithmetic mean of actual confidences; errored cases count as `0.0`.
    pub mean_confidence: f64,
    pub tolerance: f64,
    pub verdict: Verdict,
}

impl Report {
    fn from_results(cases: Vec<CaseResult>, tolerance: f64) -> Self {
        let total = cases.len();
        let passed = cases.iter().filter(|c| c.passed()).count();
        let (pass_rate, mean_confidence) = if total == 0 {
            (1.0, 0.0)
        } else {
            let sum: f64 = cases.iter().map(|c| c.actual_confidence).sum();
            (passed as f64 / total as f64, sum / total as f64)
        };
        let verdict = if passed == total {
            Verdict::Passed
        } else {
            Verdict::Failed
        };

        Self {
            cases,
            total,
            passed,
            pass_rate,
            mean_confidence,
            tolerance,
            verdict,
        }
    }

    /// Same summary with the per-case rows removed.
    pub fn without_details(mut self) -> Self {
        self.cases.clear();
        self
    }

    pub fn is_passed(&self) -> bool {
        self.verdict == Verdict::Passed
    }
}

/// Run every case and summarize.
///
/// Only malformed arguments fail the call; per-case pipeline failures are
/// recorded in the report.
pub async fn run(
    retriever: &Retriever,
    config: &PipelineConfig,
    cases: &[ValidationTestCase],
    tolerance: f64,
    top_k: usize,
) -> Result<Report> {
    if !tolerance.is_finite() || tolerance < 0.0 {
        return Err(PipelineError::InvalidArgument(format!(
            "tolerance must be >= 0, got {}",
            tolerance
        )));
    }
    if top_k < 1 {
        return Err(PipelineError::InvalidArgument("top_k must be >= 1".into()));
    }

    let mut results = Vec::with_capacity(cases.len());
    for case in cases {
        let result = match run_case(retriever, config, &case.query, top_k).await {
            Ok(run) => {
                let reasons = unmet_expectations(case, &run, tolerance);
                let status = if reasons.is_empty() {
                    CaseStatus::Passed
                } else {
                    CaseStatus::Failed { reasons }
                };
                CaseResult {
                    query: case.query.clone(),
                    expected_is_valid: case.expected_is_valid,
                    expected_confidence: case.expected_confidence,
                    actual_is_valid: run.outcome.is_valid,
                    actual_confidence: run.outcome.confidence,
                    top_score: run.retrieved.top_score(),
                    status,
                }
            }
            Err(e) => {
                warn!(
                    stage = e.stage(),
                    query = %truncate_for_log(&case.query),
                    error = %e,
                    "validation case errored"
                );
                CaseResult {
                    query: case.query.clone(),
                    expected_is_valid: case.expected_is_valid,
                    expected_confidence: case.expected_confidence,
                    actual_is_valid: false,
                    actual_confidence: 0.0,
                    top_score: None,
                    status: CaseStatus::Errored {
                        stage: e.stage().to_string(),
                        message: e.to_string(),
                    },
                }
            }
        };
        results.push(result);
    }

    let report = Report::from_results(results, tolerance);
    info!(
        total = report.total,
        passed = report.passed,
        mean_confidence = report.mean_confidence,
        verdict = %report.verdict,
        "validation run finished"
    );
    Ok(report)
}

/// Both retrievals of one case and the outcome of the first.
struct CaseRun {
    retrieved: RetrievalResult,
    rerun: RetrievalResult,
    outcome: ValidationOutcome,
}

async fn run_case(
    retriever: &Retriever,
    config: &PipelineConfig,
    query: &str,
    top_k: usize,
) -> Result<CaseRun> {
    let retrieved = retriever.retrieve(query, top_k, None).await?;
    let agg = aggregate(&retrieved, config.chunk_threshold)?;
    let outcome = validate_aggregation(&agg, config.validity_threshold)?;
    let rerun = retriever.retrieve(query, top_k, None).await?;

    Ok(CaseRun {
        retrieved,
        rerun,
        outcome,
    })
}

/// `|actual - expected| <= tolerance`, with no extra slack.
fn within_tolerance(actual: f64, expected: f64, tolerance: f64) -> bool {
    (actual - expected).abs() <= tolerance
}

/// Same chunk ids in the same order, scores within [`DETERMINISM_TOLERANCE`].
fn same_retrieval(a: &RetrievalResult, b: &RetrievalResult) -> bool {
    a.chunks.len() == b.chunks.len()
        && a.chunks.iter().zip(&b.chunks).all(|(x, y)| {
            x.id == y.id && within_tolerance(x.score, y.score, DETERMINISM_TOLERANCE)
        })
}

fn unmet_expectations(case: &ValidationTestCase, run: &CaseRun, tolerance: f64) -> Vec<String> {
    let outcome = &run.outcome;
    let mut reasons = Vec::new();

    if !within_tolerance(outcome.confidence, case.expected_confidence, tolerance) {
        reasons.push(format!(
            "confidence {:.3} is not within {} of {:.3}",
            outcome.confidence, tolerance, case.expected_confidence
        ));
    }
    if outcome.is_valid != case.expected_is_valid {
        reasons.push(format!(
            "is_valid is {}, expected {}",
            outcome.is_valid, case.expected_is_valid
        ));
    }
    if let Some(expected) = &case.expected_sources {
        let missing: Vec<&str> = expected
            .difference(&outcome.relevant_sources)
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            reasons.push(format!("missing sources: {}", missing.join(", ")));
        }
    }
    if !same_retrieval(&run.retrieved, &run.rerun) {
        reasons.push("a second retrieval returned different chunks".to_string());
    }
    reasons
}

/// Human-readable report for the terminal.
pub fn render(report: &Report) -> String {
    let mut out = String::new();
    out.push_str("Validation Report\n");
    out.push_str("=================\n\n");

    for case in &report.cases {
        let mark = match &case.status {
            CaseStatus::Passed => "PASS".to_string(),
            CaseStatus::Failed { .. } => "FAIL".to_string(),
            CaseStatus::Errored { stage, .. } => format!("ERROR ({})", stage),
        };
        out.push_str(&format!("  [{}] {}\n", mark, case.query));
        out.push_str(&format!(
            "         expected: valid={} confidence={:.2}\n",
            case.expected_is_valid, case.expected_confidence
        ));
        match &case.status {
            CaseStatus::Errored { message, .. } => {
                out.push_str(&format!("         error:    {}\n", message));
            }
            status => {
                let top = case
                    .top_score
                    .map_or_else(|| "none".to_string(), |s| format!("{:.3}", s));
                out.push_str(&format!(
                    "         actual:   valid={} confidence={:.2} top_score={}\n",
                    case.actual_is_valid, case.actual_confidence, top
                ));
                if let CaseStatus::Failed { reasons } = status {
                    for reason in reasons {
                        out.push_str(&format!("         reason:   {}\n", reason));
                    }
                }
            }
        }
    }
    if !report.cases.is_empty() {
        out.push('\n');
    }

    out.push_str(&format!("  Cases:       {}\n", report.total));
    out.push_str(&format!(
        "  Passed:      {} ({:.0}%)\n",
        report.passed,
        report.pass_rate * 100.0
    ));
    out.push_str(&format!("  Mean conf:   {:.3}\n", report.mean_confidence));
    out.push_str(&format!("  Tolerance:   {}\n", report.tolerance));
    out.push_str(&format!("  Verdict:     {}\n", report.verdict));
    out
}
