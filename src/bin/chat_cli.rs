use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, ValueEnum};
use folio::{telemetry, ScoredChunk};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[path = "chat_cli/providers/mod.rs"]
mod providers;

use providers::{AnthropicProvider, LlmProvider, OpenAiProvider, ProviderRequest};

const GROUNDED_SYSTEM: &str = "You answer visitor questions about the site owner's work, \
experience, and projects. Use only the supplied excerpts and name the source document \
you relied on. If the excerpts do not cover the question, say so.";

const UNGROUNDED_SYSTEM: &str = "You answer visitor questions about the site owner's work, \
experience, and projects. No supporting documents are available right now, so answer \
briefly and say that you could not look up specifics.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Provider {
    #[value(name = "openai")]
    OpenAi,
    Anthropic,
}

#[derive(Parser, Debug)]
#[command(
    name = "folio-chat",
    about = "Ask a question grounded in the ingested portfolio documents"
)]
struct ChatCli {
    /// Question to answer
    #[arg(long)]
    query: String,

    /// Retriever HTTP endpoint
    #[arg(
        long,
        env = "FOLIO_RETRIEVER_URL",
        default_value = "http://127.0.0.1:8080/v1/query"
    )]
    retriever_url: String,

    /// Number of chunks requested from the retriever
    #[arg(long, default_value_t = 4)]
    limit: usize,

    /// Seconds before the retriever call is abandoned
    #[arg(long, default_value_t = 15)]
    retriever_timeout_secs: u64,

    /// Chat completion backend
    #[arg(long, env = "FOLIO_CHAT_PROVIDER", value_enum, default_value_t = Provider::OpenAi)]
    llm_provider: Provider,

    /// OpenAI API key for the answering model
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// OpenAI chat model used for synthesis
    #[arg(long, env = "FOLIO_CHAT_MODEL", default_value = "gpt-4o-mini")]
    openai_model: String,

    /// Base URL for the OpenAI-compatible API
    #[arg(
        long,
        env = "FOLIO_OPENAI_BASE",
        default_value = "https://api.openai.com/v1"
    )]
    openai_base_url: String,

    /// Anthropic API key (required with --llm-provider anthropic)
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    anthropic_api_key: Option<String>,

    /// Anthropic model identifier
    #[arg(
        long,
        env = "FOLIO_ANTHROPIC_MODEL",
        default_value = "claude-3-5-haiku-latest"
    )]
    anthropic_model: String,

    /// Sampling temperature for the answer model
    #[arg(long, default_value_t = 0.2)]
    temperature: f32,

    /// Maximum tokens to request from the completion model
    #[arg(long, default_value_t = 400)]
    max_completion_tokens: usize,

    /// Only print the rendered prompt (skip the LLM call)
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

fn main() -> Result<()> {
    telemetry::init("folio=info,folio_chat=info");
    let cli = ChatCli::parse();
    let retriever_client = Client::builder()
        .timeout(Duration::from_secs(cli.retriever_timeout_secs.max(1)))
        .build()
        .context("failed to build retriever HTTP client")?;

    let chunks = match retrieve_chunks(&retriever_client, &cli.retriever_url, &cli.query, cli.limit)
    {
        Ok(response) if response.results.is_empty() => {
            warn!("retriever returned no chunks; answering without context");
            Vec::new()
        }
        Ok(response) => {
            info!(
                returned = response.results.len(),
                latency_ms = response.meta.latency_ms,
                "retrieved context"
            );
            response.results
        }
        Err(err) => {
            warn!(error = %err, "retrieval failed; answering without context");
            Vec::new()
        }
    };

    let (system, prompt) = build_prompt(&cli.query, &chunks);
    if cli.dry_run {
        println!("--- System ---\n{system}\n\n--- Prompt ---\n{prompt}");
        return Ok(());
    }

    let request = ProviderRequest {
        system,
        prompt: &prompt,
        temperature: cli.temperature,
        max_tokens: cli.max_completion_tokens,
    };
    let provider: Box<dyn LlmProvider> = match cli.llm_provider {
        Provider::OpenAi => {
            let key = cli
                .openai_api_key
                .clone()
                .ok_or_else(|| anyhow!("OPENAI_API_KEY must be set for the OpenAI provider"))?;
            Box::new(OpenAiProvider::new(
                key,
                cli.openai_model.clone(),
                &cli.openai_base_url,
            )?)
        }
        Provider::Anthropic => {
            let key = cli.anthropic_api_key.clone().ok_or_else(|| {
                anyhow!("ANTHROPIC_API_KEY must be set for the Anthropic provider")
            })?;
            Box::new(AnthropicProvider::new(key, cli.anthropic_model.clone())?)
        }
    };
    let answer = provider.answer(&request)?;
    println!("{answer}");
    Ok(())
}

fn retrieve_chunks(
    client: &Client,
    url: &str,
    query: &str,
    limit: usize,
) -> Result<RetrieverResponse> {
    let resp = client
        .post(url)
        .json(&RetrieverRequest { query, limit })
        .send()
        .with_context(|| format!("failed to call retriever at {url}"))?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp
            .text()
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        bail!("retriever returned {status}: {body}");
    }
    resp.json().context("failed to parse retriever response")
}

/// Returns the system message and user prompt; an empty chunk list yields the
/// ungrounded variant.
fn build_prompt(question: &str, chunks: &[ScoredChunk]) -> (&'static str, String) {
    if chunks.is_empty() {
        return (UNGROUNDED_SYSTEM, format!("Question:\n{}\n", question.trim()));
    }
    let mut prompt = String::from("Excerpts:\n");
    prompt.push_str(&render_context(chunks));
    prompt.push_str("\nQuestion:\n");
    prompt.push_str(question.trim());
    prompt.push('\n');
    (GROUNDED_SYSTEM, prompt)
}

fn render_context(chunks: &[ScoredChunk]) -> String {
    let mut out = String::new();
    for chunk in chunks {
        out.push_str(&format!(
            "Source: {} (chunk {}, similarity {:.3})\n{}\n---\n",
            chunk.source,
            chunk.chunk_index,
            chunk.similarity,
            chunk.content.trim()
        ));
    }
    out
}

#[derive(Serialize)]
struct RetrieverRequest<'a> {
    query: &'a str,
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct RetrieverResponse {
    results: Vec<ScoredChunk>,
    meta: RetrieverMeta,
}

#[derive(Debug, Deserialize)]
struct RetrieverMeta {
    latency_ms: f64,
}
