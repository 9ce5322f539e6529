//! [`CorpusIndex`] backed by a Qdrant collection over its REST API.
//!
//! Calls `POST {url}/collections/{collection}/points/search` with the
//! query vector and maps each point's payload onto [`ChunkMetadata`].
//! Qdrant returns points ordered by score descending. An API key is
//! sent in the `api-key` header when `QDRANT_API_KEY` is set.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::config::IndexConfig;
use crate::models::ChunkMetadata;

use super::{CorpusIndex, IndexHit};

pub struct QdrantIndex {
    client: reqwest::Client,
    search_url: String,
    api_key: Option<String>,
}

impl QdrantIndex {
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("index.url required for qdrant backend"))?;
        let search_url = format!(
            "{}/collections/{}/points/search",
            url.trim_end_matches('/'),
            config.collection
        );
        Ok(Self {
            client: reqwest::Client::new(),
            search_url,
            api_key: std::env::var("QDRANT_API_KEY").ok(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    result: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    id: Value,
    score: f64,
    #[serde(default)]
    payload: Option<serde_json::Map<String, Value>>,
}

#[async_trait]
impl CorpusIndex for QdrantIndex {
    fn name(&self) -> &str {
        "qdrant"
    }

    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<IndexHit>> {
        let body = serde_json::json!({
            "vector": embedding,
            "limit": top_k,
            "with_payload": true,
        });

        let mut req = self.client.post(&self.search_url).json(&body);
        if let Some(ref key) = self.api_key {
            req = req.header("api-key", key);
        }

        let response = req.send().await.context("Qdrant request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Qdrant search error {}: {}", status, body_text);
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .context("Invalid Qdrant search response")?;

        Ok(parsed.result.into_iter().map(point_to_hit).collect())
    }
}

fn point_to_hit(point: ScoredPoint) -> IndexHit {
    let payload = point.payload.unwrap_or_default();
    let content = first_str(&payload, &["text", "content"]).unwrap_or_default();
    let metadata = ChunkMetadata {
        source: first_str(&payload, &["source_url", "source", "source_document"])
            .unwrap_or_default(),
        section: first_str(&payload, &["section", "section_title"]),
        module: first_str(&payload, &["module"]),
        chapter: first_str(&payload, &["chapter"]),
    };
    IndexHit {
        chunk_id: point_id(&point.id),
        score: point.score,
        content,
        metadata,
    }
}

/// Qdrant point ids are either unsigned integers or UUID strings.
fn point_id(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn first_str(payload: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| payload.get(*k))
        .filter_map(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .find(|s| !s.is_empty())
}
