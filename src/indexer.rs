//! Write path: load → chunk → embed → store, one document at a time.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::chunker::{Chunker, TextChunk};
use crate::embedder::Embedder;
use crate::error::{RagError, RagResult};
use crate::loader::{load_document, DocumentFormat};
use crate::record::{ChunkMetadata, DocumentChunk};
use crate::store::ChunkStore;

/// What to do with chunks already stored for a re-ingested source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReingestMode {
    /// Insert alongside existing chunks.
    #[default]
    Append,
    /// Swap the source's chunks for the new ones atomically.
    Replace,
}

/// Result of a successful document ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    /// Document identifier.
    pub source: String,
    /// Chunks written to the store.
    pub chunks_written: usize,
    /// Chunks removed beforehand (`Replace` mode only).
    pub chunks_replaced: usize,
}

/// Per-run summary for multi-document ingestion.
#[derive(Debug, Default)]
pub struct IngestReport {
    /// Documents that were fully written.
    pub succeeded: Vec<IngestOutcome>,
    /// Documents whose batch was aborted.
    pub failed: Vec<(PathBuf, RagError)>,
}

impl IngestReport {
    /// Total chunks written across the run.
    pub fn chunks_written(&self) -> usize {
        self.succeeded.iter().map(|outcome| outcome.chunks_written).sum()
    }

    /// True when every document made it into the store.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Drives ingestion against an injected embedder and store.
pub struct Indexer<E: ?Sized, S: ?Sized> {
    embedder: Arc<E>,
    store: Arc<S>,
    chunker: Chunker,
    mode: ReingestMode,
}

impl<E, S> Indexer<E, S>
where
    E: Embedder + ?Sized + 'static,
    S: ChunkStore + ?Sized,
{
    /// Builds an indexer in `Append` mode.
    pub fn new(embedder: Arc<E>, store: Arc<S>, chunker: Chunker) -> Self {
        Self {
            embedder,
            store,
            chunker,
            mode: ReingestMode::default(),
        }
    }

    /// Switches the re-ingestion behavior.
    pub fn with_mode(mut self, mode: ReingestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Loads, chunks, embeds, and stores one document. Nothing is written
    /// unless every chunk embeds successfully.
    pub async fn ingest_document(&self, path: &Path) -> RagResult<IngestOutcome> {
        let document = load_document(path)?;
        let chunks = self.chunker.split(&document.source, &document.text);
        if chunks.is_empty() {
            warn!(source = %document.source, "document produced no chunks");
        }
        let records = self.embed_chunks(chunks, document.format).await?;
        self.store_document(&document.source, records).await
    }

    /// Ingests already-extracted text under `source`.
    pub async fn ingest_text(&self, source: &str, text: &str) -> RagResult<IngestOutcome> {
        let chunks = self.chunker.split(source, text);
        let records = self.embed_chunks(chunks, DocumentFormat::PlainText).await?;
        self.store_document(source, records).await
    }

    /// Ingests every path, isolating failures per document.
    pub async fn ingest_all<P: AsRef<Path>>(&self, paths: &[P]) -> IngestReport {
        let mut report = IngestReport::default();
        for path in paths {
            let path = path.as_ref();
            match self.ingest_document(path).await {
                Ok(outcome) => {
                    info!(
                        source = %outcome.source,
                        chunks = outcome.chunks_written,
                        replaced = outcome.chunks_replaced,
                        "ingested document"
                    );
                    report.succeeded.push(outcome);
                }
                Err(err) => {
                    error!(path = %path.display(), error = %err, "ingestion failed; skipping document");
                    report.failed.push((path.to_path_buf(), err));
                }
            }
        }
        report
    }

    /// Embeds chunks one call at a time on the blocking pool; the first
    /// failure aborts the whole document.
    async fn embed_chunks(
        &self,
        chunks: Vec<TextChunk>,
        format: DocumentFormat,
    ) -> RagResult<Vec<DocumentChunk>> {
        let embedder = Arc::clone(&self.embedder);
        tokio::task::spawn_blocking(move || embed_sequentially(embedder.as_ref(), chunks, format))
            .await
            .map_err(|err| RagError::fatal(format!("embedding task failed: {err}")))?
    }

    async fn store_document(
        &self,
        source: &str,
        records: Vec<DocumentChunk>,
    ) -> RagResult<IngestOutcome> {
        let (chunks_replaced, chunks_written) = match self.mode {
            ReingestMode::Replace => self.store.replace_document(source, &records).await?,
            ReingestMode::Append if records.is_empty() => (0, 0),
            ReingestMode::Append => (0, self.store.insert_document(&records).await?),
        };
        Ok(IngestOutcome {
            source: source.to_string(),
            chunks_written,
            chunks_replaced,
        })
    }
}

fn embed_sequentially<E: Embedder + ?Sized>(
    embedder: &E,
    chunks: Vec<TextChunk>,
    format: DocumentFormat,
) -> RagResult<Vec<DocumentChunk>> {
    let format = serde_json::to_value(format).unwrap_or_default();
    let mut records = Vec::with_capacity(chunks.len());
    let mut dims: Option<usize> = None;
    for chunk in chunks {
        let embedding = embedder.embed_one(&chunk.content)?;
        let expected = *dims.get_or_insert(embedding.len());
        if embedding.len() != expected || expected == 0 {
            return Err(RagError::DimensionMismatch {
                expected,
                actual: embedding.len(),
            });
        }
        let metadata = ChunkMetadata::new(chunk.source.clone())
            .with("format", format.clone())
            .with("char_start", chunk.char_start)
            .with("char_end", chunk.char_end)
            .with("model", embedder.model());
        records.push(DocumentChunk::new(
            chunk.content,
            metadata,
            embedding,
            chunk.chunk_index,
        ));
    }
    Ok(records)
}
