//! Query embedding and corpus search.
//!
//! The [`Retriever`] embeds a query (plus any selected text), asks the
//! [`CorpusIndex`] for the `top_k` nearest chunks, and returns them as a
//! [`RetrievalResult`]. It adds no ranking of its own: hits come back in
//! index order, truncated to `top_k`.
//!
//! The embed and search calls share one deadline; when it passes, the
//! in-flight requests are dropped and the call fails with
//! [`PipelineError::RetrievalUnavailable`]. Dropping the future returned
//! by [`Retriever::retrieve`] cancels outstanding work the same way.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::embedding::{compose_query_text, EmbeddingProvider};
use crate::error::{stage, truncate_for_log, PipelineError, Result};
use crate::index::{CorpusIndex, IndexHit};
use crate::models::{check_query_text, Chunk, RetrievalResult};

pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn CorpusIndex>,
    timeout: Duration,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn CorpusIndex>,
        timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            index,
            timeout,
        }
    }

    /// Retrieve the `top_k` chunks nearest to the query.
    ///
    /// Fails with [`PipelineError::EmptyQuery`] before any outbound call
    /// when `query_text` trims to empty.
    pub async fn retrieve(
        &self,
        query_text: &str,
        top_k: usize,
        selected_text: Option<&str>,
    ) -> Result<RetrievalResult> {
        check_query_text(query_text)?;
        if top_k < 1 {
            return Err(PipelineError::InvalidArgument("top_k must be >= 1".into()));
        }

        let started = Instant::now();
        let outcome = tokio::time::timeout(
            self.timeout,
            self.embed_and_search(query_text, top_k, selected_text),
        )
        .await;

        let (hits, embed_time, search_time) = match outcome {
            Ok(res) => res?,
            Err(_) => {
                let err = PipelineError::retrieval_unavailable(
                    stage::RETRIEVE,
                    query_text,
                    format!("timed out after {:?}", self.timeout),
                );
                warn!(stage = stage::RETRIEVE, query = %truncate_for_log(query_text), "{}", err);
                return Err(err);
            }
        };

        let chunks = order_hits(query_text, hits, top_k);
        info!(
            query = %truncate_for_log(query_text),
            index = self.index.name(),
            hits = chunks.len(),
            embed_ms = embed_time.as_millis() as u64,
            search_ms = search_time.as_millis() as u64,
            total_ms = started.elapsed().as_millis() as u64,
            "retrieval completed"
        );

        Ok(RetrievalResult {
            query: query_text.to_string(),
            chunks,
        })
    }

    async fn embed_and_search(
        &self,
        query_text: &str,
        top_k: usize,
        selected_text: Option<&str>,
    ) -> Result<(Vec<IndexHit>, Duration, Duration)> {
        let embed_start = Instant::now();
        let text = compose_query_text(query_text, selected_text);
        let vector = self.embedder.embed(&text).await.map_err(|e| {
            let err = PipelineError::retrieval_unavailable(stage::EMBED, query_text, e);
            warn!(stage = stage::EMBED, model = self.embedder.model_name(), "{}", err);
            err
        })?;
        let embed_time = embed_start.elapsed();

        let search_start = Instant::now();
        let hits = self.index.search(&vector, top_k).await.map_err(|e| {
            let err = PipelineError::retrieval_unavailable(stage::SEARCH, query_text, e);
            warn!(stage = stage::SEARCH, index = self.index.name(), "{}", err);
            err
        })?;

        Ok((hits, embed_time, search_start.elapsed()))
    }
}

/// Turn raw hits into ordered chunks: drop non-finite scores, keep index
/// order, truncate to `top_k`. A misordered response is stable-sorted so
/// ties still keep index order.
fn order_hits(query_text: &str, hits: Vec<IndexHit>, top_k: usize) -> Vec<Chunk> {
    let mut chunks: Vec<Chunk> = hits
        .into_iter()
        .filter(|h| {
            let finite = h.score.is_finite();
            if !finite {
                warn!(chunk_id = %h.chunk_id, "dropping hit with non-finite score");
            }
            finite
        })
        .map(Chunk::from)
        .collect();

    if !chunks.windows(2).all(|w| w[0].score >= w[1].score) {
        warn!(
            query = %truncate_for_log(query_text),
            "corpus index returned hits out of score order"
        );
        chunks.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    chunks.truncate(top_k);
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;

    fn make_hit(id: &str, score: f64) -> IndexHit {
        IndexHit {
            chunk_id: id.to_string(),
            score,
            content: String::new(),
            metadata: ChunkMetadata::default(),
        }
    }

    fn ids(chunks: &[Chunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn test_order_hits_keeps_index_order() {
        let hits = vec![make_hit("a", 0.9), make_hit("b", 0.8), make_hit("c", 0.8)];
        let chunks = order_hits("q", hits, 10);
        assert_eq!(ids(&chunks), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_order_hits_truncates() {
        let hits = vec![make_hit("a", 0.9), make_hit("b", 0.8), make_hit("c", 0.7)];
        assert_eq!(order_hits("q", hits, 2).len(), 2);
    }

    #[test]
    fn test_order_hits_repairs_misordered_stably() {
        let hits = vec![
            make_hit("low", 0.3),
            make_hit("tie1", 0.8),
            make_hit("top", 0.95),
            make_hit("tie2", 0.8),
        ];
        let chunks = order_hits("q", hits, 10);
        assert_eq!(ids(&chunks), vec!["top", "tie1", "tie2", "low"]);
    }

    struct FixedEmbedder(Vec<f32>);

    #[async_trait::async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        fn model_name(&self) -> &str {
            "fixed"
        }

        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    fn memory_retriever() -> Retriever {
        let index = crate::index::InMemoryIndex::new();
        let meta = |s: &str| ChunkMetadata {
            source: s.to_string(),
            ..Default::default()
        };
        index.upsert("near", "ROS 2 nodes", meta("https://example.com/ros2-intro"), vec![1.0, 0.0]);
        index.upsert("mid", "topics", meta("https://example.com/topics"), vec![1.0, 1.0]);
        index.upsert("far", "URDF", meta("https://example.com/urdf"), vec![0.0, 1.0]);
        Retriever::new(
            Arc::new(FixedEmbedder(vec![1.0, 0.0])),
            Arc::new(index),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_retrieve_from_memory_index() {
        let result = memory_retriever().retrieve("What is ROS 2?", 2, None).await.unwrap();
        assert_eq!(ids(&result.chunks), vec!["near", "mid"]);
        assert!(result.is_ordered());
        assert_eq!(result.query, "What is ROS 2?");
    }

    #[tokio::test]
    async fn test_retrieve_rejects_zero_top_k() {
        let err = memory_retriever().retrieve("q", 0, None).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_retrieve_rejects_empty_query() {
        let err = memory_retriever().retrieve(" ", 5, None).await.unwrap_err();
        assert!(matches!(err, PipelineError::EmptyQuery));
    }

    #[test]
    fn test_order_hits_drops_nan() {
        let hits = vec![make_hit("a", 0.9), make_hit("nan", f64::NAN)];
        let chunks = order_hits("q", hits, 10);
        assert_eq!(ids(&chunks), vec!["a"]);
    }
}
