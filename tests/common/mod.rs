//! Test doubles shared by the integration tests.
//!
//! [`TopicEmbedder`] maps a query to a one-element "topic" vector and
//! [`ScriptedIndex`] answers each topic with canned hits, so every score
//! in a test is known exactly.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use grounded_qa::config::PipelineConfig;
use grounded_qa::embedding::EmbeddingProvider;
use grounded_qa::index::{CorpusIndex, IndexHit};
use grounded_qa::models::ChunkMetadata;
use grounded_qa::pipeline::Pipeline;
use grounded_qa::retriever::Retriever;
use grounded_qa::session::{ManualClock, SessionStore};

pub const TOPIC_NONE: f32 = 0.0;
pub const TOPIC_ROS2: f32 = 1.0;
pub const TOPIC_URDF: f32 = 2.0;
pub const TOPIC_AI: f32 = 3.0;

/// Embeds text as `[topic]`, recording every text it was asked to embed.
#[derive(Default)]
pub struct TopicEmbedder {
    pub calls: AtomicUsize,
    pub seen: Mutex<Vec<String>>,
}

#[async_trait]
impl EmbeddingProvider for TopicEmbedder {
    fn model_name(&self) -> &str {
        "topic-test"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(text.to_string());

        let lower = text.to_lowercase();
        let topic = if lower.contains("urdf") {
            TOPIC_URDF
        } else if lower.contains("ros 2") {
            TOPIC_ROS2
        } else if lower.contains("ai to") {
            TOPIC_AI
        } else {
            TOPIC_NONE
        };
        Ok(vec![topic])
    }
}

/// Returns the hits registered for the topic in `embedding[0]`.
#[derive(Default)]
pub struct ScriptedIndex {
    pub calls: AtomicUsize,
    hits: HashMap<u32, Vec<IndexHit>>,
    failing: Vec<u32>,
    delay: Option<Duration>,
    drift: f64,
}

impl ScriptedIndex {
    pub fn with_hits(mut self, topic: f32, hits: Vec<IndexHit>) -> Self {
        self.hits.insert(topic as u32, hits);
        self
    }

    /// Searches for `topic` fail as if the backend were down.
    pub fn failing_on(mut self, topic: f32) -> Self {
        self.failing.push(topic as u32);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every search lowers all scores by `step` more than the one before.
    pub fn with_drift(mut self, step: f64) -> Self {
        self.drift = step;
        self
    }
}

#[async_trait]
impl CorpusIndex for ScriptedIndex {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<IndexHit>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let topic = embedding.first().copied().unwrap_or(TOPIC_NONE) as u32;
        if self.failing.contains(&topic) {
            bail!("connection refused");
        }
        let mut hits = self.hits.get(&topic).cloned().unwrap_or_default();
        for h in &mut hits {
            h.score -= self.drift * call as f64;
        }
        hits.truncate(top_k);
        Ok(hits)
    }
}

pub fn hit(id: &str, score: f64, source: &str) -> IndexHit {
    IndexHit {
        chunk_id: id.to_string(),
        score,
        content: format!("content of {}", id),
        metadata: ChunkMetadata {
            source: source.to_string(),
            ..Default::default()
        },
    }
}

/// A small textbook corpus: one topic per default harness case.
///
/// Confidences at threshold 0.7: ROS 2 → 0.973, URDF → 0.90, AI → 0.925.
pub fn textbook_index() -> ScriptedIndex {
    ScriptedIndex::default()
        .with_hits(
            TOPIC_ROS2,
            vec![
                hit("ros2-intro-0", 0.95, "https://example.com/ros2-intro"),
                hit("ros2-arch-3", 0.92, "https://example.com/ros2-architecture"),
                hit("gazebo-1", 0.41, "https://example.com/gazebo"),
            ],
        )
        .with_hits(
            TOPIC_URDF,
            vec![
                hit("urdf-basics-0", 0.90, "https://example.com/urdf"),
                hit("xacro-2", 0.55, "https://example.com/xacro"),
            ],
        )
        .with_hits(
            TOPIC_AI,
            vec![
                hit("vla-0", 0.88, "https://example.com/vla"),
                hit("ros2-bridge-4", 0.75, "https://example.com/ros2-ai-bridge"),
            ],
        )
}

pub struct TestPipeline {
    pub pipeline: Arc<Pipeline>,
    pub embedder: Arc<TopicEmbedder>,
    pub index: Arc<ScriptedIndex>,
    pub clock: Arc<ManualClock>,
}

pub fn build(index: ScriptedIndex) -> TestPipeline {
    build_with_timeout(index, Duration::from_secs(5))
}

pub fn build_with_timeout(index: ScriptedIndex, timeout: Duration) -> TestPipeline {
    let embedder = Arc::new(TopicEmbedder::default());
    let index = Arc::new(index);
    let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
    let config = PipelineConfig::default();

    let retriever = Retriever::new(embedder.clone(), index.clone(), timeout);
    let sessions = Arc::new(SessionStore::from_config(&config, clock.clone()));
    let pipeline = Arc::new(Pipeline::new(retriever, sessions, config));

    TestPipeline {
        pipeline,
        embedder,
        index,
        clock,
    }
}
