#![warn(missing_docs)]
//! Document ingestion and retrieval pipeline behind the portfolio chat widget.
//!
//! The write path loads a document, splits it into overlapping chunks, embeds
//! each chunk, and stores the batch; the read path embeds a query and returns
//! the nearest stored chunks by cosine similarity.

pub mod chunker;
pub mod config;
pub mod embedder;
pub mod error;
pub mod indexer;
pub mod loader;
pub mod record;
pub mod retriever;
pub mod similarity;
pub mod store;
pub mod telemetry;

pub use chunker::{Chunker, ChunkerConfig, TextChunk};
pub use embedder::{Embedder, HashingEmbedder, OpenAiEmbedder, Paced, RetryPolicy};
pub use error::{RagError, RagResult};
pub use indexer::{IngestOutcome, IngestReport, Indexer, ReingestMode};
pub use loader::{discover_documents, load_document, DocumentFormat, LoadedDocument};
pub use record::{ChunkMetadata, DocumentChunk, ScoredChunk};
pub use retriever::{QueryRequest, Retriever, RetrieverConfig};
pub use store::{ChunkStore, InMemoryStore, PgVectorStore, TableName};
