//! Embedding client for retrieval indexing and querying
//!
//! Talks to an OpenAI-compatible `/v1/embeddings` endpoint. Batch requests
//! preserve input order; single-text calls go through a small LRU cache so
//! repeated question embeddings stay off the wire.

use anyhow::{Context, Result};
use async_trait::async_trait;
use lru::LruCache;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

const EMBED_TIMEOUT: Duration = Duration::from_secs(30);
const CACHE_ENTRIES: usize = 1000;

/// Embedding capability seam.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed many texts in one request, preserving input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: i32,
}

/// HTTP client for the external embedding service.
pub struct EmbeddingClient {
    client: Client,
    base_url: String,
    model: String,
    cache: Mutex<LruCache<u64, Vec<f32>>>,
}

impl EmbeddingClient {
    pub fn new(base_url: &str, model: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(EMBED_TIMEOUT)
            .build()
            .context("failed to build embedding HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_ENTRIES).expect("nonzero cache size"),
            )),
        })
    }

    async fn request(&self, input: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .json(&EmbeddingRequest {
                model: self.model.clone(),
                input,
            })
            .send()
            .await
            .context("embedding request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("embedding service returned {}", response.status());
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .context("failed to parse embedding response")?;

        // The service may reorder results; index restores input order.
        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }

    fn cache_key(text: &str) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        hasher.finish()
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = Self::cache_key(text);
        if let Some(cached) = self.cache.lock().expect("cache lock").get(&key) {
            return Ok(cached.clone());
        }

        let mut vectors = self.request(vec![text.to_string()]).await?;
        let embedding = vectors
            .pop()
            .ok_or_else(|| anyhow::anyhow!("no embedding in response"))?;

        self.cache
            .lock()
            .expect("cache lock")
            .put(key, embedding.clone());
        Ok(embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self.request(texts.to_vec()).await?;
        if vectors.len() != texts.len() {
            anyhow::bail!(
                "embedding service returned {} vectors for {} inputs",
                vectors.len(),
                texts.len()
            );
        }
        Ok(vectors)
    }
}

/// Deterministic token-hash embedder.
///
/// No network and no model download; quality is far below a real model but
/// similarity of overlapping texts is preserved well enough for tests and
/// for degraded deployments without an embedding service.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut embedding = vec![0.0f32; self.dim];
        for token in text.split_whitespace() {
            let mut hasher = DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            let hash = hasher.finish();
            for (j, slot) in embedding.iter_mut().enumerate() {
                let mut hasher = DefaultHasher::new();
                hash.hash(&mut hasher);
                (j as u64).hash(&mut hasher);
                let val = hasher.finish();
                *slot += ((val as f64 / u64::MAX as f64) * 2.0 - 1.0) as f32;
            }
        }

        let mag: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if mag > 0.0 {
            for val in embedding.iter_mut() {
                *val /= mag;
            }
        }
        embedding
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
    }
}

/// Cosine similarity between two vectors; 0.0 on dimension mismatch.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}
