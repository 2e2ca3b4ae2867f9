//! Postgres identifier helpers for the chunk table.

use crate::error::{RagError, RagResult};

/// Fully-qualified Postgres table name (schema + table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    schema: String,
    table: String,
}

impl TableName {
    /// Builds a new table identifier.
    pub fn new<S, T>(schema: S, table: T) -> RagResult<Self>
    where
        S: Into<String>,
        T: Into<String>,
    {
        let schema = schema.into();
        let table = table.into();
        if schema.trim().is_empty() {
            return Err(RagError::InvalidConfig("schema name is required".into()));
        }
        if table.trim().is_empty() {
            return Err(RagError::InvalidConfig("table name is required".into()));
        }
        Ok(Self { schema, table })
    }

    /// Fully-qualified table reference with quoted identifiers.
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }

    /// Returns the raw schema string.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Returns the raw table string.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Index name for the `(source, chunk_index)` lookup index.
    pub fn source_index_name(&self) -> String {
        quote_ident(&format!(
            "{}_{}_source_idx",
            sanitize_ident(&self.schema),
            sanitize_ident(&self.table)
        ))
    }
}

/// Quotes Postgres identifiers, escaping embedded quotes.
pub fn quote_ident(input: &str) -> String {
    let escaped = input.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

fn sanitize_ident(input: &str) -> String {
    input
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_embedded_quotes() {
        let table = TableName::new("public", "doc\"chunks").unwrap();
        assert_eq!(table.qualified(), "\"public\".\"doc\"\"chunks\"");
    }

    #[test]
    fn index_name_is_sanitized() {
        let table = TableName::new("rag-data", "document chunks").unwrap();
        assert_eq!(
            table.source_index_name(),
            "\"rag_data_document_chunks_source_idx\""
        );
    }

    #[test]
    fn requires_names() {
        assert!(TableName::new(" ", "chunks").is_err());
        assert!(TableName::new("public", "").is_err());
    }
}
