//! # Grounded QA
//!
//! Retrieval and grounding validation for questions against a fixed
//! textbook corpus.
//!
//! A query is embedded, matched against the corpus index, and the
//! retrieved chunks are reduced to a single confidence value that decides
//! whether the query is answerable from the corpus at all. Per-conversation
//! context is kept in a TTL-evicted session store, and a regression
//! harness checks confidence outputs against known cases.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌───────────┐   ┌───────────┐
//! │ Session  │──▶│ Retriever │──▶│ Aggregate │──▶│ Grounding │
//! │  merge   │   │ embed+ANN │   │ noisy-OR  │   │ is_valid  │
//! └──────────┘   └─────┬─────┘   └───────────┘   └───────────┘
//!                      │
//!            ┌─────────┴─────────┐
//!            ▼                   ▼
//!      ┌───────────┐       ┌───────────┐
//!      │ Embedding │       │  Corpus   │
//!      │ provider  │       │  index    │
//!      └───────────┘       └───────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Pipeline failure taxonomy |
//! | [`models`] | Core data types |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Corpus index abstraction (Qdrant, in-memory) |
//! | [`retriever`] | Query → ranked chunks |
//! | [`aggregate`] | Threshold filtering and confidence |
//! | [`grounding`] | Answerability decision |
//! | [`session`] | Session store and sweeper |
//! | [`harness`] | Validation regression harness |
//! | [`pipeline`] | Operations exposed to CLI and HTTP |
//! | [`server`] | HTTP server |

pub mod aggregate;
pub mod config;
pub mod embedding;
pub mod error;
pub mod grounding;
pub mod harness;
pub mod index;
pub mod models;
pub mod pipeline;
pub mod retriever;
pub mod server;
pub mod session;
