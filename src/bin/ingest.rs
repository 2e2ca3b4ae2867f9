use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser};
use folio::config::{ChunkingArgs, EmbeddingArgs, StoreArgs};
use folio::{discover_documents, load_document, telemetry, ChunkStore, Chunker, Embedder};
use folio::{Indexer, ReingestMode};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "folio-ingest",
    about = "Load, chunk, embed, and store documents for the chat retriever"
)]
struct IngestCli {
    /// Documents to ingest (.txt, .md, .pdf)
    paths: Vec<PathBuf>,

    /// Also ingest every recognized document directly inside this directory
    #[arg(long, env = "FOLIO_INGEST_DIR")]
    dir: Option<PathBuf>,

    /// Atomically swap a source's existing chunks for the new ones
    #[arg(long, default_value_t = false)]
    replace: bool,

    /// Minimum milliseconds between embedding calls
    #[arg(long, env = "FOLIO_EMBED_PACING_MS", default_value_t = 100)]
    pacing_ms: u64,

    /// Create the vector extension/table automatically if missing
    #[arg(long, env = "FOLIO_PGVECTOR_PREPARE", default_value_t = true, action = ArgAction::Set)]
    prepare_table: bool,

    /// Only chunk the documents and print the chunks as JSON lines
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    #[command(flatten)]
    chunking: ChunkingArgs,

    #[command(flatten)]
    embedding: EmbeddingArgs,

    #[command(flatten)]
    store: StoreArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init("folio=info");
    let cli = IngestCli::parse();
    let paths = collect_paths(&cli)?;
    anyhow::ensure!(
        !paths.is_empty(),
        "no documents to ingest; pass file paths or --dir"
    );
    let chunker = cli.chunking.chunker()?;

    if cli.dry_run {
        return print_chunks(&chunker, &paths);
    }

    let embedder = cli
        .embedding
        .build(Duration::from_millis(cli.pacing_ms))?;
    let store = Arc::new(cli.store.connect().await?);
    if cli.prepare_table {
        let dims = probe_dimensions(Arc::clone(&embedder)).await?;
        store
            .ensure_schema(dims)
            .await
            .context("failed to prepare chunk table")?;
    }

    let mode = if cli.replace {
        ReingestMode::Replace
    } else {
        ReingestMode::Append
    };
    info!(
        documents = paths.len(),
        model = embedder.model(),
        ?mode,
        "starting ingestion"
    );
    let indexer = Indexer::new(embedder, Arc::clone(&store), chunker).with_mode(mode);
    let report = indexer.ingest_all(&paths).await;
    store.close().await.context("failed to close chunk store")?;

    let written = report.chunks_written();
    println!(
        "Wrote {} chunk{} from {} document{} into {}.",
        written,
        if written == 1 { "" } else { "s" },
        report.succeeded.len(),
        if report.succeeded.len() == 1 { "" } else { "s" },
        store.table().qualified()
    );
    if !report.is_success() {
        for (path, err) in &report.failed {
            eprintln!("failed: {}: {err}", path.display());
        }
        anyhow::bail!(
            "{} of {} document(s) failed to ingest",
            report.failed.len(),
            paths.len()
        );
    }
    Ok(())
}

fn collect_paths(cli: &IngestCli) -> Result<Vec<PathBuf>> {
    let mut paths = cli.paths.clone();
    if let Some(dir) = &cli.dir {
        let found = discover_documents(dir)
            .with_context(|| format!("failed to scan {}", dir.display()))?;
        if found.is_empty() {
            warn!(dir = %dir.display(), "no recognized documents found");
        }
        paths.extend(found);
    }
    Ok(paths)
}

fn print_chunks(chunker: &Chunker, paths: &[PathBuf]) -> Result<()> {
    let stdout = io::stdout();
    let mut writer = BufWriter::new(stdout.lock());
    let mut total = 0usize;
    for path in paths {
        let document = load_document(path)?;
        let chunks = chunker.split(&document.source, &document.text);
        total += chunks.len();
        for chunk in &chunks {
            serde_json::to_writer(&mut writer, chunk)?;
            writer.write_all(b"\n")?;
        }
    }
    writer.flush()?;
    info!(chunks = total, "dry run complete; nothing embedded or stored");
    Ok(())
}

async fn probe_dimensions(embedder: Arc<dyn Embedder>) -> Result<usize> {
    let vector = tokio::task::spawn_blocking(move || embedder.embed_one("dimension probe"))
        .await
        .map_err(|err| anyhow!("embedding task join error: {err}"))??;
    anyhow::ensure!(!vector.is_empty(), "embedding provider returned an empty vector");
    Ok(vector.len())
}
