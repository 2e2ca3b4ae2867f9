//! Read path: embed a query and return its nearest stored chunks.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::time::timeout;
use tracing::debug;

use crate::embedder::Embedder;
use crate::error::{RagError, RagResult};
use crate::record::ScoredChunk;
use crate::store::ChunkStore;

/// Limits and deadlines applied to every query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrieverConfig {
    /// Results returned when the caller omits `limit`.
    pub default_limit: usize,
    /// Upper bound applied to caller-provided limits.
    pub max_limit: usize,
    /// Deadline for the query embedding call.
    pub embed_timeout: Duration,
    /// Deadline for the store query.
    pub search_timeout: Duration,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            default_limit: 4,
            max_limit: 20,
            embed_timeout: Duration::from_secs(10),
            search_timeout: Duration::from_secs(5),
        }
    }
}

/// Query payload: `{ "query": "...", "limit": 4 }`.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    /// Free-text question.
    pub query: String,
    /// Optional result count.
    #[serde(default)]
    pub limit: Option<usize>,
}

impl QueryRequest {
    /// Request with the default limit.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: None,
        }
    }

    /// Overrides the result count.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Stateless query service over an injected embedder and store.
pub struct Retriever<E: ?Sized, S: ?Sized> {
    embedder: Arc<E>,
    store: Arc<S>,
    config: RetrieverConfig,
}

impl<E, S> Retriever<E, S>
where
    E: Embedder + ?Sized + 'static,
    S: ChunkStore + ?Sized,
{
    /// Builds a retriever.
    pub fn new(embedder: Arc<E>, store: Arc<S>, config: RetrieverConfig) -> Self {
        Self {
            embedder,
            store,
            config,
        }
    }

    /// Active config.
    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    /// Backing store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Embeds the query and returns up to `limit` chunks, most similar first.
    pub async fn retrieve(&self, request: &QueryRequest) -> RagResult<Vec<ScoredChunk>> {
        let limit = self.resolve_limit(request.limit)?;
        let embedding = self.embed_query(&request.query).await?;
        self.search(&embedding, limit).await
    }

    /// Validates a caller limit: zero is rejected, large values are clamped.
    pub fn resolve_limit(&self, requested: Option<usize>) -> RagResult<usize> {
        match requested {
            Some(0) => Err(RagError::InvalidConfig("limit must be at least 1".into())),
            Some(limit) => Ok(limit.min(self.config.max_limit.max(1))),
            None => Ok(self.config.default_limit.clamp(1, self.config.max_limit.max(1))),
        }
    }

    /// Embeds a query on the blocking pool under the embed deadline.
    ///
    /// The deadline abandons the blocking task but cannot cancel it; the
    /// embedder's own HTTP timeout bounds how long it keeps a pool thread
    /// (see `EmbeddingArgs::bounded_by`).
    pub async fn embed_query(&self, query: &str) -> RagResult<Vec<f32>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::InvalidConfig(
                "query text must not be empty".into(),
            ));
        }
        let embedder = Arc::clone(&self.embedder);
        let text = query.to_string();
        let task = tokio::task::spawn_blocking(move || embedder.embed_one(&text));
        let embedding = timeout(self.config.embed_timeout, task)
            .await
            .map_err(|_| RagError::Timeout {
                operation: "query embedding",
                after: self.config.embed_timeout,
            })?
            .map_err(|err| RagError::fatal(format!("embedding task failed: {err}")))??;
        debug!(dims = embedding.len(), "embedded query");
        Ok(embedding)
    }

    /// Runs the nearest-neighbor query under the search deadline.
    pub async fn search(&self, embedding: &[f32], limit: usize) -> RagResult<Vec<ScoredChunk>> {
        let results = timeout(self.config.search_timeout, self.store.search(embedding, limit))
            .await
            .map_err(|_| RagError::Timeout {
                operation: "similarity search",
                after: self.config.search_timeout,
            })??;
        debug!(limit, returned = results.len(), "similarity search complete");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashingEmbedder;
    use crate::record::DocumentChunk;
    use crate::store::InMemoryStore;
    use async_trait::async_trait;

    struct SlowStore;

    #[async_trait]
    impl ChunkStore for SlowStore {
        async fn insert_document(&self, chunks: &[DocumentChunk]) -> RagResult<usize> {
            Ok(chunks.len())
        }

        async fn replace_document(
            &self,
            _source: &str,
            chunks: &[DocumentChunk],
        ) -> RagResult<(usize, usize)> {
            Ok((0, chunks.len()))
        }

        async fn delete_source(&self, _source: &str) -> RagResult<usize> {
            Ok(0)
        }

        async fn count_source(&self, _source: &str) -> RagResult<usize> {
            Ok(0)
        }

        async fn search(&self, _embedding: &[f32], _limit: usize) -> RagResult<Vec<ScoredChunk>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }
    }

    struct SlowEmbedder;

    impl Embedder for SlowEmbedder {
        fn embed_batch(&self, inputs: &[&str]) -> RagResult<Vec<Vec<f32>>> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(inputs.iter().map(|_| vec![1.0; 4]).collect())
        }

        fn model(&self) -> &str {
            "slow"
        }
    }

    fn retriever<S: ChunkStore + 'static>(store: S) -> Retriever<HashingEmbedder, S> {
        Retriever::new(
            Arc::new(HashingEmbedder::new(32)),
            Arc::new(store),
            RetrieverConfig::default(),
        )
    }

    #[test]
    fn resolves_limits() {
        let retriever = retriever(InMemoryStore::new());
        assert_eq!(retriever.resolve_limit(None).unwrap(), 4);
        assert_eq!(retriever.resolve_limit(Some(7)).unwrap(), 7);
        assert_eq!(retriever.resolve_limit(Some(500)).unwrap(), 20);
        assert!(retriever.resolve_limit(Some(0)).is_err());
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let retriever = retriever(InMemoryStore::new());
        let err = retriever
            .retrieve(&QueryRequest::new("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn empty_store_returns_no_results() {
        let retriever = retriever(InMemoryStore::new());
        let results = retriever
            .retrieve(&QueryRequest::new("experience"))
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn slow_search_times_out() {
        let mut retriever = retriever(SlowStore);
        retriever.config.search_timeout = Duration::from_millis(20);
        let err = retriever
            .retrieve(&QueryRequest::new("experience"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RagError::Timeout {
                operation: "similarity search",
                ..
            }
        ));
    }

    #[test]
    fn parses_request_without_limit() {
        let request: QueryRequest = serde_json::from_str(r#"{"query":"rust"}"#).unwrap();
        assert_eq!(request.query, "rust");
        assert_eq!(request.limit, None);
    }

    #[test]
    fn default_limit_never_exceeds_max() {
        let mut retriever = retriever(InMemoryStore::new());
        retriever.config.default_limit = 50;
        assert_eq!(retriever.resolve_limit(None).unwrap(), 20);
        assert_eq!(retriever.resolve_limit(Some(50)).unwrap(), 20);
    }

    #[tokio::test]
    async fn slow_embedding_times_out() {
        let config = RetrieverConfig {
            embed_timeout: Duration::from_millis(20),
            ..RetrieverConfig::default()
        };
        let retriever = Retriever::new(
            Arc::new(SlowEmbedder),
            Arc::new(InMemoryStore::new()),
            config,
        );
        let err = retriever
            .retrieve(&QueryRequest::new("experience"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RagError::Timeout {
                operation: "query embedding",
                ..
            }
        ));
    }
}
