use anyhow::anyhow;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use hyper::body::Bytes;
use scholar_core::cache::{CacheConfig, CacheService, CacheStore, MemoryStore, WriteMode};
use scholar_core::Bm25;
use serde_json::Value;
use server::config::ServerConfig;
use server::records::{Article, JsonSource, RecordSource};
use server::AppState;
use std::fs;
use std::sync::Arc;
use tempfile::tempdir;
use tower::ServiceExt;

const PAPERS: &str = r#"[
  {"id": "p1", "title": "Rust for systems programming", "abstract": "Memory safety without garbage collection. Rust rust rust.", "authors": "Ada", "update_date": "2023-05-01"},
  {"id": "p2", "title": "Learning rust", "abstract": "An introduction.", "authors": "Bob", "update_date": "2024-01-10"},
  {"id": "p3", "title": "Graph databases", "abstract": "Property graphs and query languages.", "authors": "Cy", "update_date": "2022-03-03"},
  {"id": "p4", "title": "Distributed caching", "abstract": "Cache-aside and write-through.", "authors": "Di", "update_date": "2021-07-07"},
  {"id": "p5", "title": "Quantum computing", "abstract": "Qubits and gates.", "authors": "Ed", "update_date": "2020-02-02"}
]"#;

const ARTICLES: &str = "{\"id\": 1, \"title\": \"Kebijakan energi terbarukan\", \"institution\": \"ITS\", \"content\": \"Energi surya dan angin.\", \"year\": 2021}\n\
{\"id\": 2, \"title\": \"Ekonomi digital\", \"institution\": \"UI\", \"content\": \"Pasar digital dan energi.\", \"year\": 2023}\n\
{\"id\": 3, \"title\": \"Sejarah maritim\", \"institution\": \"UGM\", \"content\": \"Pelabuhan kuno.\", \"year\": 2019}\n";

fn memory_cache() -> (Arc<MemoryStore>, Arc<CacheService>) {
    let store = Arc::new(MemoryStore::new());
    let cache = CacheService::with_config(
        store.clone(),
        CacheConfig { write_mode: WriteMode::Awaited, ..CacheConfig::default() },
    );
    (store, Arc::new(cache))
}

fn build_app(admin_token: Option<&str>) -> (Router, Arc<MemoryStore>) {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("papers.json"), PAPERS).unwrap();
    fs::write(dir.path().join("articles.jsonl"), ARTICLES).unwrap();
    let (store, cache) = memory_cache();
    let config = ServerConfig { admin_token: admin_token.map(str::to_string), ..ServerConfig::default() };
    let state = AppState::load(dir.path(), cache, Bm25::default(), config).unwrap();
    (server::router(state), store)
}

async fn call(app: &Router, method: &str, uri: &str, token: Option<&str>) -> (StatusCode, Bytes) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        req = req.header("X-ADMIN-TOKEN", token);
    }
    let resp = app.clone().oneshot(req.body(Body::empty()).unwrap()).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let (status, body) = call(app, "GET", uri, None).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn search_returns_ranked_results() {
    let (app, _) = build_app(None);
    let (status, json) = get_json(&app, "/search?q=rust").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 2);
    let arr = json["results"].as_array().unwrap();
    assert_eq!(arr.len(), 2);
    assert_eq!(arr[0]["id"], "p1");
    assert_eq!(arr[0]["score"], 1.0);
    assert_eq!(arr[1]["id"], "p2");
    assert_eq!(arr[1]["score"], 0.0);
    assert!(arr[0]["highlight"]["title"].as_str().unwrap().contains("<em>Rust</em>"));
    assert!(arr[0]["highlight"]["abstract"].as_str().unwrap().contains("<em>rust</em>"));
}

#[tokio::test]
async fn search_results_are_cached() {
    let (app, store) = build_app(None);
    get_json(&app, "/search?q=graph").await;
    assert_eq!(store.keys("search:papers:*").unwrap().len(), 1);
    let (_, stats) = get_json(&app, "/cache/stats").await;
    assert_eq!(stats["counters"]["misses"], 1);

    let (status, json) = get_json(&app, "/search?q=graph").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["results"][0]["id"], "p3");
    let (_, stats) = get_json(&app, "/cache/stats").await;
    assert_eq!(stats["counters"]["hits"], 1);
    assert_eq!(stats["connected"], true);
}

#[tokio::test]
async fn missing_query_is_a_validation_error() {
    let (app, store) = build_app(None);
    for uri in ["/search", "/search?q=", "/articles/search?q=%20", "/autocomplete"] {
        let (status, json) = get_json(&app, uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert!(json["error"].as_str().unwrap().contains("q"));
    }
    assert!(store.keys("*").unwrap().is_empty());
}

#[tokio::test]
async fn article_search_uses_snippets() {
    let (app, _) = build_app(None);
    let (status, json) = get_json(&app, "/articles/search?q=energi&limit=5").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 2);
    let arr = json["results"].as_array().unwrap();
    let ids: Vec<&str> = arr.iter().map(|h| h["id"].as_str().unwrap()).collect();
    assert!(ids.contains(&"1") && ids.contains(&"2"));
    assert!(arr[0]["snippet"].as_str().unwrap().contains("<em>"));

    let (_, none) = get_json(&app, "/articles/search?q=xyzzy").await;
    assert_eq!(none["total"], 0);
    assert_eq!(none["results"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn listing_paginates_newest_first() {
    let (app, _) = build_app(None);
    let (status, json) = get_json(&app, "/papers").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 5);
    assert_eq!(json["limit"], 4);
    let ids: Vec<&str> = json["results"].as_array().unwrap().iter().map(|p| p["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["p2", "p1", "p3", "p4"]);

    let (_, page2) = get_json(&app, "/papers?page=2&limit=3").await;
    assert_eq!(page2["results"].as_array().unwrap().len(), 2);
    assert_eq!(page2["results"][0]["id"], "p4");

    let (status, _) = get_json(&app, "/papers?page=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, articles) = get_json(&app, "/articles").await;
    assert_eq!(articles["limit"], 5);
    assert_eq!(articles["results"][0]["id"], "2");
}

#[tokio::test]
async fn detail_and_count() {
    let (app, _) = build_app(None);
    let (status, json) = get_json(&app, "/papers/p3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["title"], "Graph databases");

    let (status, json) = get_json(&app, "/papers/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].is_string());

    let (_, json) = get_json(&app, "/articles/3").await;
    assert_eq!(json["institution"], "UGM");

    let (_, json) = get_json(&app, "/papers/count").await;
    assert_eq!(json["totalDocuments"], 5);
    let (_, json) = get_json(&app, "/articles/count").await;
    assert_eq!(json["totalDocuments"], 3);
}

#[tokio::test]
async fn autocomplete_matches_word_prefixes() {
    let (app, _) = build_app(None);
    let (status, json) = get_json(&app, "/autocomplete?q=ru").await;
    assert_eq!(status, StatusCode::OK);
    let titles: Vec<&str> = json["suggestions"].as_array().unwrap().iter().map(|s| s["title"].as_str().unwrap()).collect();
    assert_eq!(titles, vec!["Rust for systems programming", "Learning rust"]);

    let (_, json) = get_json(&app, "/autocomplete?q=e&limit=1").await;
    assert_eq!(json["suggestions"].as_array().unwrap().len(), 1);
    assert_eq!(json["suggestions"][0]["kind"], "article");
}

#[tokio::test]
async fn cache_clear_requires_admin_token() {
    let (app, store) = build_app(Some("secret"));
    get_json(&app, "/papers").await;
    get_json(&app, "/papers/count").await;
    let before = store.keys("*").unwrap().len();
    assert_eq!(before, 2);

    let (status, _) = call(&app, "DELETE", "/cache", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = call(&app, "DELETE", "/cache", Some("wrong")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = call(&app, "DELETE", "/cache?pattern=stats:*", Some("secret")).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["deleted"], 1);

    let (_, body) = call(&app, "DELETE", "/cache", Some("secret")).await;
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["deleted"], 1);
    assert!(store.keys("*").unwrap().is_empty());
}

struct DownSource;

impl<R> RecordSource<R> for DownSource {
    fn list(&self, _: usize, _: usize) -> anyhow::Result<Vec<R>> { Err(anyhow!("connection refused")) }
    fn get(&self, _: &str) -> anyhow::Result<Option<R>> { Err(anyhow!("connection refused")) }
    fn count(&self) -> anyhow::Result<usize> { Err(anyhow!("connection refused")) }
    fn candidates(&self) -> anyhow::Result<Vec<R>> { Err(anyhow!("connection refused")) }
}

#[tokio::test]
async fn backend_failure_is_a_server_error_and_not_cached() {
    let (store, cache) = memory_cache();
    let state = AppState {
        papers: Arc::new(DownSource),
        articles: Arc::new(JsonSource::<Article>::new(Vec::new())),
        cache,
        bm25: Bm25::default(),
        config: Arc::new(ServerConfig::default()),
    };
    let app = server::router(state);
    let (status, json) = get_json(&app, "/search?q=rust").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "failed to fetch data");
    assert!(store.keys("*").unwrap().is_empty());

    let (status, json) = get_json(&app, "/articles/search?q=rust").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 0);
}
