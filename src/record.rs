//! Chunk records persisted by the indexer and returned by the retriever.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RagError, RagResult};

/// Metadata bag attached to every stored chunk.
///
/// `source` is mandatory; everything else lands in `extra` and is flattened
/// next to it when serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Originating document identifier.
    pub source: String,
    /// Open extension fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ChunkMetadata {
    /// Metadata with only the mandatory `source` key.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            extra: BTreeMap::new(),
        }
    }

    /// Adds an extension field.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Checks the mandatory key before the record crosses the storage boundary.
    pub fn validate(&self) -> RagResult<()> {
        if self.source.trim().is_empty() {
            return Err(RagError::InvalidChunk("metadata source is empty".into()));
        }
        if self.extra.contains_key("source") {
            return Err(RagError::InvalidChunk(
                "metadata extension must not redefine `source`".into(),
            ));
        }
        Ok(())
    }
}

/// Unit of storage and retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// Identifier generated when the chunk is created.
    pub id: Uuid,
    /// Chunk text span.
    pub content: String,
    /// Metadata bag (always carries `source`).
    pub metadata: ChunkMetadata,
    /// Model embedding vector.
    pub embedding: Vec<f32>,
    /// Originating document, duplicated from metadata for direct queries.
    pub source: String,
    /// Zero-based position within the source document.
    pub chunk_index: usize,
    /// Ingestion timestamp.
    pub created_at: DateTime<Utc>,
}

impl DocumentChunk {
    /// Creates a record with a fresh id and timestamp.
    pub fn new(
        content: String,
        metadata: ChunkMetadata,
        embedding: Vec<f32>,
        chunk_index: usize,
    ) -> Self {
        let source = metadata.source.clone();
        Self {
            id: Uuid::new_v4(),
            content,
            metadata,
            embedding,
            source,
            chunk_index,
            created_at: Utc::now(),
        }
    }

    /// Embedding dimensionality.
    pub fn dimensions(&self) -> usize {
        self.embedding.len()
    }

    /// Validates the record against the index dimensionality.
    pub fn validate(&self, expected_dims: usize) -> RagResult<()> {
        if self.content.trim().is_empty() {
            return Err(RagError::InvalidChunk(format!(
                "chunk {} of {} has empty content",
                self.chunk_index, self.source
            )));
        }
        self.metadata.validate()?;
        if self.metadata.source != self.source {
            return Err(RagError::InvalidChunk(format!(
                "metadata source {:?} disagrees with record source {:?}",
                self.metadata.source, self.source
            )));
        }
        if self.embedding.len() != expected_dims {
            return Err(RagError::DimensionMismatch {
                expected: expected_dims,
                actual: self.embedding.len(),
            });
        }
        Ok(())
    }
}

/// Checks that a document's chunks share a source and are indexed `0..n`.
pub fn validate_document(chunks: &[DocumentChunk]) -> RagResult<()> {
    let Some(first) = chunks.first() else {
        return Ok(());
    };
    let dims = first.dimensions();
    if dims == 0 {
        return Err(RagError::InvalidChunk("embedding is empty".into()));
    }
    for (expected_index, chunk) in chunks.iter().enumerate() {
        chunk.validate(dims)?;
        if chunk.source != first.source {
            return Err(RagError::InvalidChunk(format!(
                "batch mixes sources {:?} and {:?}",
                first.source, chunk.source
            )));
        }
        if chunk.chunk_index != expected_index {
            return Err(RagError::InvalidChunk(format!(
                "chunk index {} out of sequence (expected {})",
                chunk.chunk_index, expected_index
            )));
        }
    }
    Ok(())
}

/// Retrieval result row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    /// Originating document.
    pub source: String,
    /// Chunk text.
    pub content: String,
    /// Position within the source document.
    pub chunk_index: usize,
    /// `1 - cosine_distance` between the query and the chunk.
    pub similarity: f64,
}
