//! pgvector-backed chunk store.

use async_trait::async_trait;
use pgvector::Vector;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_postgres::types::Json;
use tokio_postgres::{Client, NoTls, Row, Transaction};
use tracing::{debug, error, info};

use super::{ensure_source, ChunkStore, TableName};
use crate::error::{RagError, RagResult};
use crate::record::{validate_document, DocumentChunk, ScoredChunk};

/// Postgres table with a `VECTOR(n)` column, queried with the cosine
/// distance operator.
pub struct PgVectorStore {
    client: Mutex<Option<Client>>,
    connection: Mutex<Option<JoinHandle<()>>>,
    table: TableName,
    dimensions: Mutex<Option<usize>>,
    insert_sql: String,
    search_sql: String,
}

impl PgVectorStore {
    /// Opens a connection and spawns its driver task.
    pub async fn connect(database_url: &str, table: TableName) -> RagResult<Self> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|err| RagError::Storage(format!("failed to connect to Postgres: {err}")))?;
        let handle = tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!(error = %err, "postgres connection error");
            }
        });
        info!(table = %table.qualified(), "connected to pgvector store");
        Ok(Self {
            client: Mutex::new(Some(client)),
            connection: Mutex::new(Some(handle)),
            insert_sql: insert_sql(&table),
            search_sql: search_sql(&table),
            table,
            dimensions: Mutex::new(None),
        })
    }

    /// Target table.
    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// Creates the extension, table, and lookup index when missing, and pins
    /// the store to `dims`. Fails if an existing table disagrees.
    pub async fn ensure_schema(&self, dims: usize) -> RagResult<()> {
        if dims == 0 {
            return Err(RagError::InvalidConfig(
                "embedding dimension must be positive".into(),
            ));
        }
        {
            let guard = self.client.lock().await;
            let client = live(&guard)?;
            client
                .execute("CREATE EXTENSION IF NOT EXISTS vector", &[])
                .await
                .map_err(|err| storage("failed to ensure pgvector extension", err))?;
            client
                .execute(&create_table_sql(&self.table, dims), &[])
                .await
                .map_err(|err| storage("failed to create chunk table", err))?;
            client
                .execute(&create_index_sql(&self.table), &[])
                .await
                .map_err(|err| storage("failed to create source index", err))?;
        }
        match self.existing_dimensions().await? {
            Some(existing) if existing != dims => Err(RagError::DimensionMismatch {
                expected: existing,
                actual: dims,
            }),
            _ => {
                *self.dimensions.lock().await = Some(dims);
                Ok(())
            }
        }
    }

    /// Reads the declared dimensionality of the embedding column, if the
    /// table exists.
    pub async fn existing_dimensions(&self) -> RagResult<Option<usize>> {
        let guard = self.client.lock().await;
        let client = live(&guard)?;
        let row = client
            .query_opt(
                "SELECT atttypmod FROM pg_attribute \
                 WHERE attrelid = to_regclass($1::text) AND attname = 'embedding' AND NOT attisdropped",
                &[&self.table.qualified()],
            )
            .await
            .map_err(|err| storage("failed to inspect embedding column", err))?;
        Ok(row.and_then(|row| {
            let typmod: i32 = row.get(0);
            usize::try_from(typmod).ok().filter(|dims| *dims > 0)
        }))
    }

    async fn pinned_dimensions(&self) -> RagResult<Option<usize>> {
        let mut pinned = self.dimensions.lock().await;
        if pinned.is_none() {
            *pinned = self.existing_dimensions().await?;
        }
        Ok(*pinned)
    }

    async fn check_dimensions(&self, first: &DocumentChunk) -> RagResult<()> {
        match self.pinned_dimensions().await? {
            Some(dims) if first.dimensions() != dims => Err(RagError::DimensionMismatch {
                expected: dims,
                actual: first.dimensions(),
            }),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl ChunkStore for PgVectorStore {
    async fn insert_document(&self, chunks: &[DocumentChunk]) -> RagResult<usize> {
        validate_document(chunks)?;
        let Some(first) = chunks.first() else {
            return Ok(0);
        };
        self.check_dimensions(first).await?;

        let mut guard = self.client.lock().await;
        let client = guard
            .as_mut()
            .ok_or_else(|| RagError::Storage("store is closed".into()))?;
        let transaction = client
            .transaction()
            .await
            .map_err(|err| storage("failed to open transaction", err))?;
        write_rows(&transaction, &self.insert_sql, chunks).await?;
        transaction
            .commit()
            .await
            .map_err(|err| storage("failed to commit document", err))?;
        debug!(source = %first.source, rows = chunks.len(), "inserted document chunks");
        Ok(chunks.len())
    }

    async fn replace_document(
        &self,
        source: &str,
        chunks: &[DocumentChunk],
    ) -> RagResult<(usize, usize)> {
        validate_document(chunks)?;
        ensure_source(source, chunks)?;
        if let Some(first) = chunks.first() {
            self.check_dimensions(first).await?;
        }

        let mut guard = self.client.lock().await;
        let client = guard
            .as_mut()
            .ok_or_else(|| RagError::Storage("store is closed".into()))?;
        let transaction = client
            .transaction()
            .await
            .map_err(|err| storage("failed to open transaction", err))?;
        let removed = transaction
            .execute(&delete_sql(&self.table), &[&source])
            .await
            .map_err(|err| storage("failed to delete source chunks", err))?;
        write_rows(&transaction, &self.insert_sql, chunks).await?;
        // Rolled back on drop if anything above failed.
        transaction
            .commit()
            .await
            .map_err(|err| storage("failed to commit replacement", err))?;
        debug!(source, removed, rows = chunks.len(), "replaced document chunks");
        Ok((removed as usize, chunks.len()))
    }

    async fn delete_source(&self, source: &str) -> RagResult<usize> {
        let guard = self.client.lock().await;
        let client = live(&guard)?;
        let removed = client
            .execute(&delete_sql(&self.table), &[&source])
            .await
            .map_err(|err| storage("failed to delete source chunks", err))?;
        Ok(removed as usize)
    }

    async fn count_source(&self, source: &str) -> RagResult<usize> {
        let guard = self.client.lock().await;
        let client = live(&guard)?;
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE source = $1",
            self.table.qualified()
        );
        let row = client
            .query_one(&sql, &[&source])
            .await
            .map_err(|err| storage("failed to count source chunks", err))?;
        let count: i64 = row.get(0);
        Ok(count.max(0) as usize)
    }

    async fn search(&self, embedding: &[f32], limit: usize) -> RagResult<Vec<ScoredChunk>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let vector = Vector::from(embedding.to_vec());
        let limit = as_i64(limit)?;
        let guard = self.client.lock().await;
        let client = live(&guard)?;
        let rows = client
            .query(self.search_sql.as_str(), &[&vector, &limit])
            .await
            .map_err(|err| storage("similarity query failed", err))?;
        rows.iter().map(scored_from_row).collect()
    }

    async fn close(&self) -> RagResult<()> {
        drop(self.client.lock().await.take());
        if let Some(handle) = self.connection.lock().await.take() {
            handle
                .await
                .map_err(|err| RagError::Storage(format!("connection task failed: {err}")))?;
        }
        info!(table = %self.table.qualified(), "closed pgvector store");
        Ok(())
    }
}

async fn write_rows(
    transaction: &Transaction<'_>,
    insert_sql: &str,
    chunks: &[DocumentChunk],
) -> RagResult<()> {
    let statement = transaction
        .prepare(insert_sql)
        .await
        .map_err(|err| storage("failed to prepare insert", err))?;
    for chunk in chunks {
        let vector = Vector::from(chunk.embedding.clone());
        let metadata = Json(&chunk.metadata);
        let chunk_index = as_i64(chunk.chunk_index)?;
        transaction
            .execute(
                &statement,
                &[
                    &chunk.id,
                    &chunk.source,
                    &chunk_index,
                    &chunk.content,
                    &metadata,
                    &vector,
                    &chunk.created_at,
                ],
            )
            .await
            .map_err(|err| {
                storage(
                    &format!(
                        "failed to insert chunk {} from {}",
                        chunk.chunk_index, chunk.source
                    ),
                    err,
                )
            })?;
    }
    Ok(())
}

fn live(guard: &Option<Client>) -> RagResult<&Client> {
    guard
        .as_ref()
        .ok_or_else(|| RagError::Storage("store is closed".into()))
}

fn storage(context: &str, err: tokio_postgres::Error) -> RagError {
    RagError::Storage(format!("{context}: {err}"))
}

fn as_i64(value: usize) -> RagResult<i64> {
    i64::try_from(value).map_err(|_| RagError::Storage(format!("value {value} exceeds i64 range")))
}

fn scored_from_row(row: &Row) -> RagResult<ScoredChunk> {
    let chunk_index: i64 = row.get("chunk_index");
    Ok(ScoredChunk {
        source: row.get("source"),
        content: row.get("content"),
        chunk_index: usize::try_from(chunk_index).map_err(|_| {
            RagError::Storage(format!("negative chunk_index {chunk_index} in store"))
        })?,
        similarity: row.get("similarity"),
    })
}

fn create_table_sql(table: &TableName, dims: usize) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id UUID PRIMARY KEY,
            source TEXT NOT NULL,
            chunk_index BIGINT NOT NULL,
            content TEXT NOT NULL,
            metadata JSONB NOT NULL,
            embedding VECTOR({dims}) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
        table.qualified()
    )
}

fn create_index_sql(table: &TableName) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} (source, chunk_index)",
        table.source_index_name(),
        table.qualified()
    )
}

fn delete_sql(table: &TableName) -> String {
    format!("DELETE FROM {} WHERE source = $1", table.qualified())
}

fn insert_sql(table: &TableName) -> String {
    format!(
        "INSERT INTO {} \
            (id, source, chunk_index, content, metadata, embedding, created_at) \
            VALUES ($1, $2, $3, $4, $5, $6, $7)",
        table.qualified()
    )
}

fn search_sql(table: &TableName) -> String {
    format!(
        "SELECT \
            source, \
            content, \
            chunk_index, \
            1 - (embedding <=> $1) AS similarity \
        FROM {} \
        ORDER BY embedding <=> $1 ASC, source ASC, chunk_index ASC \
        LIMIT $2",
        table.qualified()
    )
}
