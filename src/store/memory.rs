//! In-process store used for tests, dry runs, and small corpora.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ensure_source, ChunkStore};
use crate::error::{RagError, RagResult};
use crate::record::{validate_document, DocumentChunk, ScoredChunk};
use crate::similarity::{cosine_similarity, rank_top_k};

/// Full-scan store backed by a vector of records.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

#[derive(Debug, Default)]
struct State {
    dimensions: Option<usize>,
    chunks: Vec<DocumentChunk>,
}

impl InMemoryStore {
    /// Empty store; dimensionality is fixed by the first insert.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty store pinned to `dimensions`.
    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            state: RwLock::new(State {
                dimensions: Some(dimensions),
                chunks: Vec::new(),
            }),
        }
    }

    /// Total stored chunks.
    pub async fn len(&self) -> usize {
        self.state.read().await.chunks.len()
    }

    /// True when nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ChunkStore for InMemoryStore {
    async fn insert_document(&self, chunks: &[DocumentChunk]) -> RagResult<usize> {
        validate_document(chunks)?;
        let Some(first) = chunks.first() else {
            return Ok(0);
        };
        let mut state = self.state.write().await;
        let dims = *state.dimensions.get_or_insert(first.dimensions());
        if first.dimensions() != dims {
            return Err(RagError::DimensionMismatch {
                expected: dims,
                actual: first.dimensions(),
            });
        }
        state.chunks.extend_from_slice(chunks);
        Ok(chunks.len())
    }

    async fn replace_document(
        &self,
        source: &str,
        chunks: &[DocumentChunk],
    ) -> RagResult<(usize, usize)> {
        validate_document(chunks)?;
        ensure_source(source, chunks)?;
        let mut state = self.state.write().await;
        if let Some(first) = chunks.first() {
            let dims = *state.dimensions.get_or_insert(first.dimensions());
            if first.dimensions() != dims {
                return Err(RagError::DimensionMismatch {
                    expected: dims,
                    actual: first.dimensions(),
                });
            }
        }
        let before = state.chunks.len();
        state.chunks.retain(|chunk| chunk.source != source);
        let removed = before - state.chunks.len();
        state.chunks.extend_from_slice(chunks);
        Ok((removed, chunks.len()))
    }

    async fn delete_source(&self, source: &str) -> RagResult<usize> {
        let mut state = self.state.write().await;
        let before = state.chunks.len();
        state.chunks.retain(|chunk| chunk.source != source);
        Ok(before - state.chunks.len())
    }

    async fn count_source(&self, source: &str) -> RagResult<usize> {
        let state = self.state.read().await;
        Ok(state
            .chunks
            .iter()
            .filter(|chunk| chunk.source == source)
            .count())
    }

    async fn search(&self, embedding: &[f32], limit: usize) -> RagResult<Vec<ScoredChunk>> {
        let state = self.state.read().await;
        if let Some(dims) = state.dimensions {
            if embedding.len() != dims {
                return Err(RagError::DimensionMismatch {
                    expected: dims,
                    actual: embedding.len(),
                });
            }
        }
        let candidates = state
            .chunks
            .iter()
            .map(|chunk| ScoredChunk {
                source: chunk.source.clone(),
                content: chunk.content.clone(),
                chunk_index: chunk.chunk_index,
                similarity: cosine_similarity(embedding, &chunk.embedding),
            })
            .collect();
        Ok(rank_top_k(candidates, limit))
    }
}
