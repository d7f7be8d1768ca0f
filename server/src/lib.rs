use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{delete, get},
    Json, Router,
};
use scholar_core::cache::{encode_query, generate_key, prefix, CacheReport, CacheService};
use scholar_core::highlight::{highlight, matches_any, snippet};
use scholar_core::ranker::round3;
use scholar_core::tokenizer::tokenize;
use scholar_core::{Bm25, Corpus, Searchable};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod config;
pub mod error;
pub mod records;

use config::ServerConfig;
use error::ApiError;
use records::{Article, JsonSource, Paper, Record, RecordSource};

#[derive(Clone)]
pub struct AppState {
    pub papers: Arc<dyn RecordSource<Paper>>,
    pub articles: Arc<dyn RecordSource<Article>>,
    pub cache: Arc<CacheService>,
    pub bm25: Bm25,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Load both collections from `data_dir` (`papers.json[l]`, `articles.json[l]` or same-named dirs).
    pub fn load(data_dir: &std::path::Path, cache: Arc<CacheService>, bm25: Bm25, config: ServerConfig) -> Result<Self> {
        let papers: JsonSource<Paper> = JsonSource::load(data_dir, "papers")?;
        let articles: JsonSource<Article> = JsonSource::load(data_dir, "articles")?;
        Ok(Self { papers: Arc::new(papers), articles: Arc::new(articles), cache, bm25, config: Arc::new(config) })
    }
}

#[derive(Deserialize)]
pub struct PageParams {
    pub page: Option<u32>,
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct ClearParams {
    pub pattern: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Page<T> {
    pub total: usize,
    pub page: u32,
    pub limit: usize,
    pub results: Vec<T>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CountResponse {
    #[serde(rename = "totalDocuments")]
    pub total_documents: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse<T> {
    pub query: String,
    pub total: usize,
    pub results: Vec<T>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaperHit {
    pub id: String,
    pub score: f64,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub authors: Option<String>,
    pub highlight: BTreeMap<String, String>,
    pub journal: Option<String>,
    pub doi: Option<String>,
    pub pdf: Option<String>,
    pub update_date: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ArticleHit {
    pub id: String,
    pub score: f64,
    pub title: String,
    pub institution: Option<String>,
    pub year: Option<i32>,
    pub snippet: Option<String>,
    pub highlight: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: String,
    pub title: String,
    pub kind: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AutocompleteResponse {
    pub query: String,
    pub suggestions: Vec<Suggestion>,
}

pub fn build_app(data_dir: &str, cache: Arc<CacheService>, bm25: Bm25, config: ServerConfig) -> Result<Router> {
    let state = AppState::load(std::path::Path::new(data_dir), cache, bm25, config)?;
    Ok(router(state))
}

pub fn router(state: AppState) -> Router {
    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/papers", get(list_papers))
        .route("/papers/count", get(count_papers))
        .route("/papers/:id", get(paper_detail))
        .route("/search", get(search_papers))
        .route("/articles", get(list_articles))
        .route("/articles/count", get(count_articles))
        .route("/articles/search", get(search_articles))
        .route("/articles/:id", get(article_detail))
        .route("/autocomplete", get(autocomplete))
        .route("/cache/stats", get(cache_stats))
        .route("/cache", delete(cache_clear))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

fn require_query(q: Option<String>) -> Result<String, ApiError> {
    match q.map(|s| s.trim().to_string()) {
        Some(q) if !q.is_empty() => Ok(q),
        _ => Err(ApiError::Validation("query parameter q is required".into())),
    }
}

async fn list_records<R: Record>(
    state: &AppState,
    source: &Arc<dyn RecordSource<R>>,
    key_prefix: &str,
    params: PageParams,
    default_limit: usize,
) -> Result<Json<Page<R>>, ApiError> {
    let page = params.page.unwrap_or(1);
    if page == 0 {
        return Err(ApiError::Validation("page must be at least 1".into()));
    }
    let limit = state.config.clamp_limit(params.limit, default_limit);
    let offset = (page as usize - 1) * limit;
    let (page_s, limit_s) = (page.to_string(), limit.to_string());
    let key = generate_key(key_prefix, &[Some("list"), Some(page_s.as_str()), Some(limit_s.as_str())]);

    let body = state
        .cache
        .wrap(&key, Some(state.config.cache_ttl), || async {
            let total = source.count()?;
            let results = source.list(offset, limit)?;
            Ok::<_, ApiError>(Page { total, page, limit, results })
        })
        .await?;
    Ok(Json(body))
}

async fn record_detail<R: Record>(
    state: &AppState,
    source: &Arc<dyn RecordSource<R>>,
    key_prefix: &str,
    id: String,
) -> Result<Json<R>, ApiError> {
    let key = generate_key(key_prefix, &[Some("id"), Some(id.as_str())]);
    let record = state
        .cache
        .wrap(&key, Some(state.config.cache_ttl), || async {
            source.get(&id)?.ok_or_else(|| ApiError::NotFound(format!("{key_prefix} {id} not found")))
        })
        .await?;
    Ok(Json(record))
}

async fn record_count<R: Record>(
    state: &AppState,
    source: &Arc<dyn RecordSource<R>>,
    collection: &str,
) -> Result<Json<CountResponse>, ApiError> {
    let key = generate_key(prefix::STATS, &[Some(collection), Some("count")]);
    let body = state
        .cache
        .wrap(&key, Some(state.config.cache_ttl), || async {
            Ok::<_, ApiError>(CountResponse { total_documents: source.count()? })
        })
        .await?;
    Ok(Json(body))
}

async fn list_papers(State(state): State<AppState>, Query(params): Query<PageParams>) -> Result<Json<Page<Paper>>, ApiError> {
    list_records(&state, &state.papers, prefix::PAPER, params, state.config.papers_limit).await
}

async fn list_articles(State(state): State<AppState>, Query(params): Query<PageParams>) -> Result<Json<Page<Article>>, ApiError> {
    list_records(&state, &state.articles, prefix::ARTICLE, params, state.config.articles_limit).await
}

async fn paper_detail(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Paper>, ApiError> {
    record_detail(&state, &state.papers, prefix::PAPER, id).await
}

async fn article_detail(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Article>, ApiError> {
    record_detail(&state, &state.articles, prefix::ARTICLE, id).await
}

async fn count_papers(State(state): State<AppState>) -> Result<Json<CountResponse>, ApiError> {
    record_count(&state, &state.papers, "papers").await
}

async fn count_articles(State(state): State<AppState>) -> Result<Json<CountResponse>, ApiError> {
    record_count(&state, &state.articles, "articles").await
}

/// Field highlights for every field containing a query term; long bodies are cut to a snippet.
fn field_highlights(title: &str, body: Option<&str>, body_field: &str, terms: &[String], chars: usize) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    if matches_any(title, terms) {
        out.insert("title".to_string(), highlight(title, terms));
    }
    if let Some(body) = body.filter(|b| matches_any(b, terms)) {
        if let Some(s) = snippet(body, terms, chars) {
            out.insert(body_field.to_string(), s);
        }
    }
    out
}

fn rank_papers(bm25: &Bm25, candidates: Vec<Paper>, query: &str, limit: usize, chars: usize) -> SearchResponse<PaperHit> {
    let corpus = Corpus::from_records(candidates);
    let terms = tokenize(query);
    let ranked = bm25.search(&corpus, query, limit);
    let results = ranked
        .results
        .iter()
        .map(|r| {
            let p = &r.document.record;
            PaperHit {
                id: p.id.clone(),
                score: round3(r.normalized_score),
                title: p.title.clone(),
                abstract_text: p.abstract_text.clone(),
                authors: p.authors.clone(),
                highlight: field_highlights(&p.title, p.abstract_text.as_deref(), "abstract", &terms, chars),
                journal: p.journal.clone(),
                doi: p.doi.clone(),
                pdf: p.pdf.clone(),
                update_date: p.update_date.clone(),
            }
        })
        .collect();
    SearchResponse { query: query.to_string(), total: ranked.total, results }
}

fn rank_articles(bm25: &Bm25, candidates: Vec<Article>, query: &str, limit: usize, chars: usize) -> SearchResponse<ArticleHit> {
    let corpus = Corpus::from_records(candidates);
    let terms = tokenize(query);
    let ranked = bm25.search(&corpus, query, limit);
    let results = ranked
        .results
        .iter()
        .map(|r| {
            let a = &r.document.record;
            ArticleHit {
                id: a.id.clone(),
                score: round3(r.normalized_score),
                title: a.title.clone(),
                institution: a.institution.clone(),
                year: a.year,
                snippet: a.content.as_deref().and_then(|c| snippet(c, &terms, chars)),
                highlight: field_highlights(&a.title, a.content.as_deref(), "content", &terms, chars),
            }
        })
        .collect();
    SearchResponse { query: query.to_string(), total: ranked.total, results }
}

fn search_key(collection: &str, query: &str, limit: usize) -> String {
    let (encoded, limit_s) = (encode_query(query), limit.to_string());
    generate_key(prefix::SEARCH, &[Some(collection), Some(encoded.as_str()), Some(limit_s.as_str())])
}

pub async fn search_papers(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Result<Json<SearchResponse<PaperHit>>, ApiError> {
    let query = require_query(params.q)?;
    let limit = state.config.clamp_limit(params.limit, state.config.search_limit);
    let key = search_key("papers", &query, limit);
    let body = state
        .cache
        .wrap(&key, Some(state.config.cache_ttl), || async {
            let candidates = state.papers.candidates()?;
            Ok::<_, ApiError>(rank_papers(&state.bm25, candidates, &query, limit, state.config.snippet_chars))
        })
        .await?;
    Ok(Json(body))
}

pub async fn search_articles(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Result<Json<SearchResponse<ArticleHit>>, ApiError> {
    let query = require_query(params.q)?;
    let limit = state.config.clamp_limit(params.limit, state.config.search_limit);
    let key = search_key("articles", &query, limit);
    let body = state
        .cache
        .wrap(&key, Some(state.config.cache_ttl), || async {
            let candidates = state.articles.candidates()?;
            Ok::<_, ApiError>(rank_articles(&state.bm25, candidates, &query, limit, state.config.snippet_chars))
        })
        .await?;
    Ok(Json(body))
}

fn collect_suggestions<R: Record>(records: &[R], kind: &str, needle: &str, limit: usize, seen: &mut HashSet<String>, out: &mut Vec<Suggestion>) {
    for record in records {
        if out.len() >= limit {
            return;
        }
        let title = Searchable::title(record).unwrap_or("");
        let lowered = title.to_lowercase();
        let hit = lowered.starts_with(needle) || tokenize(title).iter().any(|t| t.starts_with(needle));
        if hit && seen.insert(lowered) {
            out.push(Suggestion { id: record.id().to_string(), title: title.to_string(), kind: kind.to_string() });
        }
    }
}

pub async fn autocomplete(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Result<Json<AutocompleteResponse>, ApiError> {
    let query = require_query(params.q)?;
    let limit = state.config.clamp_limit(params.limit, state.config.autocomplete_limit);
    let (encoded, limit_s) = (encode_query(&query), limit.to_string());
    let key = generate_key(prefix::AUTOCOMPLETE, &[Some(encoded.as_str()), Some(limit_s.as_str())]);
    let body = state
        .cache
        .wrap(&key, Some(state.config.cache_ttl), || async {
            let needle = query.to_lowercase();
            let mut seen = HashSet::new();
            let mut suggestions = Vec::new();
            collect_suggestions(&state.papers.candidates()?, "paper", &needle, limit, &mut seen, &mut suggestions);
            collect_suggestions(&state.articles.candidates()?, "article", &needle, limit, &mut seen, &mut suggestions);
            Ok::<_, ApiError>(AutocompleteResponse { query: query.clone(), suggestions })
        })
        .await?;
    Ok(Json(body))
}

pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheReport> {
    Json(state.cache.report())
}

pub async fn cache_clear(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ClearParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    authorize(&state, &headers)?;
    let pattern = params.pattern.filter(|p| !p.is_empty()).unwrap_or_else(|| "*".to_string());
    let deleted = state.cache.del_pattern(&pattern);
    Ok(Json(serde_json::json!({ "pattern": pattern, "deleted": deleted })))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let required = match &state.config.admin_token {
        Some(t) => t,
        None => return Err(ApiError::Unauthorized("ADMIN_TOKEN not set".into())),
    };
    let provided = headers.get("X-ADMIN-TOKEN").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided == required {
        Ok(())
    } else {
        Err(ApiError::Unauthorized("invalid admin token".into()))
    }
}
