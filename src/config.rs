//! Command-line flag groups shared by the binaries.

use std::sync::Arc;
use std::time::Duration;

use clap::{Args, ValueEnum};

use crate::chunker::{Chunker, ChunkerConfig};
use crate::embedder::{Embedder, HashingEmbedder, OpenAiEmbedder, Paced, RetryPolicy};
use crate::error::{RagError, RagResult};
use crate::store::{PgVectorStore, TableName};

/// Embedding backends selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EmbedderKind {
    /// OpenAI-compatible HTTP endpoint.
    #[value(name = "openai")]
    OpenAi,
    /// Local feature-hashing embedder (no network).
    Hashing,
}

/// Embedding client flags.
#[derive(Args, Debug, Clone)]
pub struct EmbeddingArgs {
    /// Embedding backend
    #[arg(long, env = "FOLIO_EMBEDDER", value_enum, default_value_t = EmbedderKind::OpenAi)]
    pub embedder: EmbedderKind,

    /// OpenAI API key used for embedding calls
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Embedding model identifier
    #[arg(
        long,
        env = "FOLIO_OPENAI_MODEL",
        default_value = "text-embedding-3-small"
    )]
    pub openai_model: String,

    /// Optional dimension override when supported by the model
    #[arg(long, env = "FOLIO_OPENAI_DIMENSIONS")]
    pub openai_dimensions: Option<usize>,

    /// Base URL for the OpenAI-compatible API
    #[arg(
        long,
        env = "FOLIO_OPENAI_BASE",
        default_value = "https://api.openai.com/v1"
    )]
    pub openai_base_url: String,

    /// Seconds before an embedding request times out
    #[arg(long, env = "FOLIO_OPENAI_TIMEOUT_SECS", default_value_t = 30)]
    pub openai_timeout_secs: u64,

    /// Attempts per embedding call, including the first
    #[arg(long, env = "FOLIO_OPENAI_MAX_RETRIES", default_value_t = 5)]
    pub max_retries: usize,

    /// Base backoff delay in milliseconds for transient failures
    #[arg(long, env = "FOLIO_OPENAI_BACKOFF_MS", default_value_t = 500)]
    pub retry_base_ms: u64,

    /// Output dimensions of the hashing embedder
    #[arg(long, env = "FOLIO_HASHING_DIMENSIONS", default_value_t = 1536)]
    pub hashing_dimensions: usize,
}

impl EmbeddingArgs {
    /// Retry policy derived from the flags.
    pub fn retry_policy(&self) -> RetryPolicy {
        let base_delay = Duration::from_millis(self.retry_base_ms);
        RetryPolicy {
            max_attempts: self.max_retries.max(1),
            base_delay,
            max_delay: base_delay.saturating_mul(32),
        }
    }

    /// Copy whose HTTP timeout fits inside `deadline` and that never retries,
    /// so a blocking embed call cannot outlive a request deadline for long.
    pub fn bounded_by(&self, deadline: Duration) -> Self {
        let secs = deadline.as_secs().max(1);
        Self {
            openai_timeout_secs: self.openai_timeout_secs.clamp(1, secs),
            max_retries: 1,
            ..self.clone()
        }
    }

    /// Builds the configured embedder, spacing calls at least `pacing` apart.
    pub fn build(&self, pacing: Duration) -> RagResult<Arc<dyn Embedder>> {
        let embedder: Arc<dyn Embedder> = match self.embedder {
            EmbedderKind::OpenAi => {
                let key = self.openai_api_key.as_deref().ok_or_else(|| {
                    RagError::InvalidConfig(
                        "OPENAI_API_KEY must be set for the openai embedder".into(),
                    )
                })?;
                let client = OpenAiEmbedder::new(
                    key,
                    &self.openai_base_url,
                    self.openai_model.clone(),
                    self.openai_dimensions,
                    Duration::from_secs(self.openai_timeout_secs.max(1)),
                    self.retry_policy(),
                )?;
                Arc::new(Paced::new(client, pacing))
            }
            EmbedderKind::Hashing => Arc::new(Paced::new(
                HashingEmbedder::new(self.hashing_dimensions),
                pacing,
            )),
        };
        Ok(embedder)
    }
}

/// pgvector store flags.
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Postgres connection string (postgres://...)
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Schema holding the chunk table
    #[arg(long, env = "FOLIO_PGVECTOR_SCHEMA", default_value = "public")]
    pub schema: String,

    /// Chunk table name inside the schema
    #[arg(long, env = "FOLIO_PGVECTOR_TABLE", default_value = "document_chunks")]
    pub table: String,
}

impl StoreArgs {
    /// Validated table identifier.
    pub fn table_name(&self) -> RagResult<TableName> {
        TableName::new(self.schema.clone(), self.table.clone())
    }

    /// Opens the pgvector store.
    pub async fn connect(&self) -> RagResult<PgVectorStore> {
        let url = self.database_url.as_deref().ok_or_else(|| {
            RagError::InvalidConfig("DATABASE_URL must be set to reach the chunk store".into())
        })?;
        PgVectorStore::connect(url, self.table_name()?).await
    }
}

/// Chunk sizing flags.
#[derive(Args, Debug, Clone, Copy)]
pub struct ChunkingArgs {
    /// Maximum characters per chunk
    #[arg(long, env = "FOLIO_CHUNK_SIZE", default_value_t = 1000)]
    pub chunk_size: usize,

    /// Characters shared by consecutive chunks
    #[arg(long, env = "FOLIO_CHUNK_OVERLAP", default_value_t = 200)]
    pub chunk_overlap: usize,
}

impl ChunkingArgs {
    /// Validated chunker.
    pub fn chunker(&self) -> RagResult<Chunker> {
        Ok(Chunker::new(ChunkerConfig::new(
            self.chunk_size,
            self.chunk_overlap,
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        embedding: EmbeddingArgs,
        #[command(flatten)]
        store: StoreArgs,
        #[command(flatten)]
        chunking: ChunkingArgs,
    }

    #[test]
    fn parses_overrides() {
        let cli = TestCli::try_parse_from([
            "test",
            "--embedder",
            "hashing",
            "--hashing-dimensions",
            "64",
            "--table",
            "resume_chunks",
            "--chunk-size",
            "500",
            "--chunk-overlap",
            "50",
        ])
        .unwrap();
        assert_eq!(cli.embedding.embedder, EmbedderKind::Hashing);
        assert_eq!(cli.store.table_name().unwrap().table(), "resume_chunks");
        assert_eq!(cli.chunking.chunker().unwrap().config().chunk_size(), 500);

        let embedder = cli.embedding.build(Duration::ZERO).unwrap();
        assert_eq!(embedder.embed_one("hello").unwrap().len(), 64);
    }

    #[test]
    fn invalid_overlap_is_rejected() {
        let cli = TestCli::try_parse_from(["test", "--chunk-size", "100", "--chunk-overlap", "100"])
            .unwrap();
        assert!(cli.chunking.chunker().is_err());
    }

    #[test]
    fn retry_policy_follows_flags() {
        let cli = TestCli::try_parse_from(["test", "--max-retries", "0", "--retry-base-ms", "10"])
            .unwrap();
        let policy = cli.embedding.retry_policy();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.base_delay, Duration::from_millis(10));
        assert_eq!(policy.max_delay, Duration::from_millis(320));
    }

    #[test]
    fn bounded_args_fit_the_deadline() {
        let cli = TestCli::try_parse_from(["test", "--openai-timeout-secs", "30"]).unwrap();
        let bounded = cli.embedding.bounded_by(Duration::from_millis(10_000));
        assert_eq!(bounded.openai_timeout_secs, 10);
        assert_eq!(bounded.retry_policy().max_attempts, 1);

        let tight = cli.embedding.bounded_by(Duration::from_millis(200));
        assert_eq!(tight.openai_timeout_secs, 1);
        assert_eq!(cli.embedding.openai_timeout_secs, 30);
    }
}
