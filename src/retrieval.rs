//! Per-chapter embedding index and top-k retrieval.
//!
//! Every analyzed chapter gets its own in-memory index over its chunks.
//! Scoring is cosine similarity; ties break on ascending chunk index so a
//! query is fully deterministic for a deterministic provider.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::instrument;

use crate::chunking::Chunk;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("retrieval unavailable: {0}")]
    Unavailable(String),
}

impl From<EmbeddingError> for RetrievalError {
    fn from(err: EmbeddingError) -> Self {
        match err {
            EmbeddingError::Unavailable(msg) => RetrievalError::Unavailable(msg),
        }
    }
}

/// Maps text to fixed-dimension vectors. Implementations must be
/// deterministic per input for retrieval to be reproducible.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// A chunk scored against a query.
#[derive(Clone, Debug)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// In-memory vector index over one chapter's chunks.
pub struct ChapterIndex {
    provider: Arc<dyn EmbeddingProvider>,
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
}

impl ChapterIndex {
    /// Embeds all chunks in one provider call and builds the index.
    #[instrument(skip_all, fields(chunks = chunks.len()))]
    pub async fn build(
        provider: Arc<dyn EmbeddingProvider>,
        chunks: Vec<Chunk>,
    ) -> Result<Self, RetrievalError> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            provider.embed(&texts).await?
        };
        if vectors.len() != chunks.len() {
            return Err(RetrievalError::Unavailable(format!(
                "provider returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }
        Ok(Self {
            provider,
            chunks,
            vectors,
        })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// The indexed chunks, in chapter order.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Top-k chunks by cosine similarity, ties broken by ascending chunk
    /// index. Returns fewer than k when the chapter has fewer chunks.
    #[instrument(skip_all, fields(query_len = query.len(), top_k))]
    pub async fn query(&self, query: &str, top_k: usize) -> Result<Vec<ScoredChunk>, RetrievalError> {
        if self.chunks.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let embedded = self.provider.embed(&[query.to_string()]).await?;
        let query_vec = embedded
            .into_iter()
            .next()
            .ok_or_else(|| RetrievalError::Unavailable("provider returned no query vector".into()))?;

        let mut scored: Vec<ScoredChunk> = self
            .chunks
            .iter()
            .zip(self.vectors.iter())
            .map(|(chunk, vector)| ScoredChunk {
                chunk: chunk.clone(),
                score: cosine_similarity(&query_vec, vector),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.chunk.index.cmp(&b.chunk.index))
        });
        scored.truncate(top_k);
        Ok(scored)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Deterministic test provider: token-hash bag-of-words vectors, so texts
/// sharing vocabulary score closer than unrelated texts.
pub struct MockEmbeddingProvider {
    dimensions: usize,
    fail: bool,
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self {
            dimensions: 64,
            fail: false,
        }
    }
}

impl MockEmbeddingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider whose every call fails, for degraded-path tests.
    pub fn failing() -> Self {
        Self {
            dimensions: 64,
            fail: true,
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        use std::hash::{DefaultHasher, Hash, Hasher};

        let mut vector = vec![0.0f32; self.dimensions];
        for token in text.split_whitespace() {
            let mut hasher = DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            let slot = (hasher.finish() as usize) % self.dimensions;
            vector[slot] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if self.fail {
            return Err(EmbeddingError::Unavailable("mock provider set to fail".into()));
        }
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}
