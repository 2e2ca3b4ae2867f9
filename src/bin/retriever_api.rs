use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use folio::config::{EmbeddingArgs, StoreArgs};
use folio::{
    telemetry, ChunkStore, Embedder, QueryRequest, RagError, Retriever, RetrieverConfig,
    ScoredChunk,
};
use lru::LruCache;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "folio-retriever",
    about = "HTTP API that wraps pgvector similarity search for the chat widget"
)]
struct ApiCli {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "FOLIO_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// Results returned when the client does not pass a limit.
    #[arg(long, default_value_t = 4)]
    default_limit: usize,

    /// Maximum limit allowed per request.
    #[arg(long, default_value_t = 20)]
    max_limit: usize,

    /// Milliseconds allowed for the query embedding call.
    #[arg(long, env = "FOLIO_EMBED_TIMEOUT_MS", default_value_t = 10_000)]
    embed_timeout_ms: u64,

    /// Milliseconds allowed for the similarity query.
    #[arg(long, env = "FOLIO_SEARCH_TIMEOUT_MS", default_value_t = 5_000)]
    search_timeout_ms: u64,

    /// Max cached query embeddings kept in-memory (0 disables caching).
    #[arg(long, default_value_t = 1024)]
    embedding_cache_size: usize,

    /// Max requests per minute allowed (0 disables rate limiting).
    #[arg(long, default_value_t = 120)]
    max_requests_per_minute: u32,

    /// Rate-limit burst size (tokens available instantly).
    #[arg(long, default_value_t = 12)]
    rate_limit_burst: u32,

    #[command(flatten)]
    embedding: EmbeddingArgs,

    #[command(flatten)]
    store: StoreArgs,
}

type DynRetriever = Retriever<dyn Embedder, dyn ChunkStore>;

#[derive(Clone)]
struct AppState {
    retriever: Arc<DynRetriever>,
    embedding_cache: Option<Arc<Mutex<LruCache<String, Vec<f32>>>>>,
    rate_limiter: Option<RateLimiter>,
}

#[derive(Debug, Serialize)]
struct QueryResponse {
    results: Vec<ScoredChunk>,
    meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
struct ResponseMeta {
    limit: usize,
    latency_ms: f64,
    cached_embedding: bool,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init("folio=info,folio_retriever=info");
    let cli = ApiCli::parse();
    let config = RetrieverConfig {
        default_limit: cli.default_limit.max(1),
        max_limit: cli.max_limit.max(1),
        embed_timeout: Duration::from_millis(cli.embed_timeout_ms.max(1)),
        search_timeout: Duration::from_millis(cli.search_timeout_ms.max(1)),
    };
    let embedder = cli
        .embedding
        .bounded_by(config.embed_timeout)
        .build(Duration::ZERO)?;
    let store: Arc<dyn ChunkStore> = Arc::new(cli.store.connect().await?);
    let retriever = Arc::new(Retriever::new(embedder, Arc::clone(&store), config));
    let state = AppState {
        retriever,
        embedding_cache: build_cache(cli.embedding_cache_size),
        rate_limiter: RateLimiter::new(cli.max_requests_per_minute, cli.rate_limit_burst),
    };

    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "folio-retriever listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server shutdown")?;
    store.close().await.context("failed to close chunk store")?;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/query", post(query_handler))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
    }
    info!("shutdown requested");
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn query_handler(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    if request.query.trim().is_empty() {
        return Err(bad_request("query text must not be empty"));
    }
    if let Some(limiter) = &state.rate_limiter {
        if !limiter.acquire().await {
            return Err(too_many_requests("rate limit exceeded"));
        }
    }
    let limit = state
        .retriever
        .resolve_limit(request.limit)
        .map_err(rag_error)?;
    let start = Instant::now();
    let (embedding, cached_embedding) = embed_query(&state, request.query.trim())
        .await
        .map_err(rag_error)?;
    let results = state
        .retriever
        .search(&embedding, limit)
        .await
        .map_err(rag_error)?;
    Ok(Json(QueryResponse {
        results,
        meta: ResponseMeta {
            limit,
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
            cached_embedding,
        },
    }))
}

async fn embed_query(state: &AppState, query: &str) -> Result<(Vec<f32>, bool), RagError> {
    if let Some(cache) = &state.embedding_cache {
        if let Some(hit) = {
            let mut guard = cache.lock().await;
            guard.get(query).cloned()
        } {
            return Ok((hit, true));
        }
    }

    let embedding = state.retriever.embed_query(query).await?;

    if let Some(cache) = &state.embedding_cache {
        let mut guard = cache.lock().await;
        guard.put(query.to_string(), embedding.clone());
    }
    Ok((embedding, false))
}

fn rag_error(err: RagError) -> ApiError {
    let status = match &err {
        RagError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
        RagError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        RagError::EmbeddingProvider { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(error = %err, status = status.as_u16(), "query failed");
    (
        status,
        Json(ErrorBody {
            message: err.to_string(),
        }),
    )
}

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

fn too_many_requests(message: impl Into<String>) -> ApiError {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

fn build_cache(size: usize) -> Option<Arc<Mutex<LruCache<String, Vec<f32>>>>> {
    NonZeroUsize::new(size).map(|capacity| Arc::new(Mutex::new(LruCache::new(capacity))))
}

#[derive(Clone)]
struct RateLimiter {
    state: Arc<Mutex<RateState>>,
    capacity: f64,
    refill_per_sec: f64,
}

struct RateState {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    fn new(max_per_minute: u32, burst: u32) -> Option<Self> {
        if max_per_minute == 0 || burst == 0 {
            return None;
        }
        let capacity = burst as f64;
        let refill_per_sec = max_per_minute as f64 / 60.0;
        Some(Self {
            state: Arc::new(Mutex::new(RateState {
                tokens: capacity,
                last_refill: Instant::now(),
            })),
            capacity,
            refill_per_sec,
        })
    }

    async fn acquire(&self) -> bool {
        let mut guard = self.state.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(guard.last_refill).as_secs_f64();
        guard.last_refill = now;
        guard.tokens = (guard.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        if guard.tokens >= 1.0 {
            guard.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
