//! # Grounded QA CLI (`gqa`)
//!
//! Runs the retrieval and grounding pipeline from the command line and
//! starts the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! gqa --config ./config/gqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `gqa query "<text>"` | Retrieve chunks and validate answerability |
//! | `gqa validate "<text>"` | Print only the validation outcome |
//! | `gqa test-validation` | Run the validation harness; exits 1 on FAILED |
//! | `gqa serve` | Start the HTTP server |
//!
//! Logs go to stderr (`RUST_LOG` overrides the default `info` level) so
//! stdout carries only results.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use grounded_qa::config;
use grounded_qa::harness::{self, load_cases};
use grounded_qa::models::Query;
use grounded_qa::pipeline::Pipeline;
use grounded_qa::server;

/// Grounded QA: answerability checks for questions against a textbook corpus.
#[derive(Parser)]
#[command(
    name = "gqa",
    about = "Grounded QA: retrieval and grounding validation against a textbook corpus",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/gqa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Retrieve supporting chunks for a question and validate it.
    Query {
        query: String,

        /// Text the user highlighted, used as extra retrieval context.
        #[arg(long)]
        selected_text: Option<String>,

        #[arg(long)]
        top_k: Option<usize>,

        /// Minimum chunk score (overrides `pipeline.chunk_threshold`).
        #[arg(long)]
        threshold: Option<f64>,

        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Validate a question without printing chunks.
    Validate {
        query: String,

        #[arg(long)]
        selected_text: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Run the validation harness against known cases.
    ///
    /// Exits with status 1 when any case fails.
    TestValidation {
        /// Allowed absolute deviation from the expected confidence.
        #[arg(long)]
        tolerance: Option<f64>,

        #[arg(long)]
        top_k: Option<usize>,

        /// JSON file of cases (defaults to `[validation].cases` or the built-in set).
        #[arg(long)]
        cases: Option<PathBuf>,

        /// Include per-case rows.
        #[arg(long, short)]
        verbose: bool,

        #[arg(long)]
        json: bool,
    },

    /// Start the HTTP server.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Query {
            query,
            selected_text,
            top_k,
            threshold,
            json,
        } => {
            let pipeline = Pipeline::from_config(&cfg)?;
            let query = Query::new(query)?
                .with_selected_text(selected_text)?
                .with_top_k(top_k)
                .with_threshold(threshold);
            let response = pipeline.query(query).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                for (i, chunk) in response.result.chunks.iter().enumerate() {
                    println!(
                        "{}. [{:.3}] {} ({})",
                        i + 1,
                        chunk.score,
                        chunk.id,
                        chunk.metadata.source
                    );
                }
                if response.result.is_empty() {
                    println!("No chunks retrieved.");
                }
                println!();
                print_outcome(&response.outcome);
            }
        }
        Commands::Validate {
            query,
            selected_text,
            json,
        } => {
            let pipeline = Pipeline::from_config(&cfg)?;
            let outcome = pipeline.validate(&query, selected_text).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_outcome(&outcome);
            }
        }
        Commands::TestValidation {
            tolerance,
            top_k,
            cases,
            verbose,
            json,
        } => {
            let pipeline = Pipeline::from_config(&cfg)?;
            let cases = cases.as_deref().map(load_cases).transpose()?;
            let report = pipeline
                .run_validation_suite(cases, tolerance, top_k, verbose)
                .await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", harness::render(&report));
            }
            if !report.is_passed() {
                std::process::exit(1);
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

fn print_outcome(outcome: &grounded_qa::models::ValidationOutcome) {
    println!("Valid:       {}", outcome.is_valid);
    println!("Confidence:  {:.3}", outcome.confidence);
    if outcome.relevant_sources.is_empty() {
        println!("Sources:     (none)");
    } else {
        println!("Sources:");
        for source in &outcome.relevant_sources {
            println!("  - {}", source);
        }
    }
}
