//! Chunk persistence and nearest-neighbor lookup.

use async_trait::async_trait;

use crate::error::{RagError, RagResult};
use crate::record::{DocumentChunk, ScoredChunk};

pub mod memory;
pub mod pgvector;
pub mod table;

pub use memory::InMemoryStore;
pub use pgvector::PgVectorStore;
pub use table::TableName;

/// Storage backend for embedded chunks.
///
/// Implementations must write a document's chunks atomically and answer
/// full-scan cosine queries ordered by descending similarity, breaking ties
/// by `(source, chunk_index)`.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Persists every chunk of one document together. Returns rows written.
    async fn insert_document(&self, chunks: &[DocumentChunk]) -> RagResult<usize>;

    /// Swaps every stored chunk of `source` for `chunks` in one atomic step.
    /// On failure the previous chunks are left untouched. Returns
    /// `(removed, written)`.
    async fn replace_document(
        &self,
        source: &str,
        chunks: &[DocumentChunk],
    ) -> RagResult<(usize, usize)>;

    /// Removes every chunk of `source`. Returns rows removed.
    async fn delete_source(&self, source: &str) -> RagResult<usize>;

    /// Number of stored chunks for `source`.
    async fn count_source(&self, source: &str) -> RagResult<usize>;

    /// Top `limit` chunks by cosine similarity to `embedding`.
    async fn search(&self, embedding: &[f32], limit: usize) -> RagResult<Vec<ScoredChunk>>;

    /// Releases backend resources. The store must not be used afterwards.
    async fn close(&self) -> RagResult<()> {
        Ok(())
    }
}

fn ensure_source(source: &str, chunks: &[DocumentChunk]) -> RagResult<()> {
    match chunks.iter().find(|chunk| chunk.source != source) {
        Some(stray) => Err(RagError::InvalidChunk(format!(
            "chunk from {} cannot replace {source}",
            stray.source
        ))),
        None => Ok(()),
    }
}
