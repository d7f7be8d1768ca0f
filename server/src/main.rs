use anyhow::Result;
use axum::Router;
use clap::{Parser, ValueEnum};
use scholar_core::cache::{CacheConfig, CacheService, CacheStore, LazyStore, MemoryStore, SledStore};
use scholar_core::Bm25;
use server::build_app;
use server::config::ServerConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CacheBackend {
    Memory,
    Sled,
    #[value(name = "none")]
    Disabled,
}

#[derive(Parser)]
struct Args {
    /// Directory holding papers.json[l] and articles.json[l]
    #[arg(long, default_value = "./data")]
    data: String,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 4000)]
    port: u16,
    /// Cache store backing the cache-aside layer
    #[arg(long, value_enum, default_value_t = CacheBackend::Memory)]
    cache: CacheBackend,
    /// Path for the sled cache store
    #[arg(long, default_value = "./cache.sled")]
    cache_path: String,
    /// Default cache TTL in seconds
    #[arg(long, default_value_t = 3600)]
    cache_ttl: u64,
    #[arg(long, default_value_t = 4)]
    papers_limit: usize,
    #[arg(long, default_value_t = 5)]
    articles_limit: usize,
    #[arg(long, default_value_t = 10)]
    search_limit: usize,
    #[arg(long, default_value_t = 5)]
    autocomplete_limit: usize,
    /// BM25 term-frequency saturation
    #[arg(long, default_value_t = 1.2)]
    k1: f64,
    /// BM25 length normalization
    #[arg(long, default_value_t = 0.75)]
    b: f64,
}

/// Connect the cache store in the background; until then every request is a pass-through.
fn connect_cache(lazy: Arc<LazyStore>, backend: CacheBackend, path: String) {
    match backend {
        CacheBackend::Disabled => tracing::warn!("cache disabled; every read goes to the backing store"),
        CacheBackend::Memory => lazy.connect(Arc::new(MemoryStore::new())),
        CacheBackend::Sled => {
            tokio::spawn(async move {
                match tokio::task::spawn_blocking(move || SledStore::open(&path)).await {
                    Ok(Ok(store)) => match store.ping() {
                        Ok(()) => lazy.connect(Arc::new(store)),
                        Err(err) => tracing::error!(error = %err, "sled cache store failed ping"),
                    },
                    Ok(Err(err)) => tracing::error!(error = %err, "failed to open sled cache store"),
                    Err(err) => tracing::error!(error = %err, "cache connect task failed"),
                }
            });
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let config = ServerConfig {
        papers_limit: args.papers_limit,
        articles_limit: args.articles_limit,
        search_limit: args.search_limit,
        autocomplete_limit: args.autocomplete_limit,
        cache_ttl: Duration::from_secs(args.cache_ttl.max(1)),
        ..ServerConfig::default()
    }
    .with_env();

    let lazy = Arc::new(LazyStore::new());
    let cache = Arc::new(CacheService::with_config(
        lazy.clone(),
        CacheConfig { default_ttl: config.cache_ttl, ..CacheConfig::default() },
    ));
    connect_cache(lazy, args.cache, args.cache_path.clone());

    let app: Router = build_app(&args.data, cache, Bm25::new(args.k1, args.b), config)?;

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, cache = ?args.cache, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
