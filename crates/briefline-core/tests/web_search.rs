use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use briefline_core::tools::{TavilyClient, WebSearchTool};
use briefline_core::{SearchSettings, SecretValue, Tool};
use serde_json::{Value, json};
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct Recorder {
    hits: Arc<AtomicUsize>,
    last_body: Arc<std::sync::Mutex<Option<Value>>>,
}

async fn spawn(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn results_handler(State(recorder): State<Recorder>, Json(body): Json<Value>) -> Json<Value> {
    recorder.hits.fetch_add(1, Ordering::SeqCst);
    *recorder.last_body.lock().unwrap() = Some(body);
    Json(json!({
        "query": "rust",
        "results": [
            {"title": "Rust", "url": "https://www.rust-lang.org", "content": "x".repeat(900)},
            {"title": "Book", "url": "https://doc.rust-lang.org/book", "content": "The book"},
            {"title": "Extra", "url": "https://example.com", "content": "ignored"}
        ]
    }))
}

async fn failing_handler(State(recorder): State<Recorder>) -> (StatusCode, &'static str) {
    recorder.hits.fetch_add(1, Ordering::SeqCst);
    (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded")
}

fn client(addr: SocketAddr, key: Option<&str>) -> TavilyClient {
    let settings = SearchSettings::new(format!("http://{addr}/search"), key.map(SecretValue::new));
    TavilyClient::new(&settings).unwrap()
}

#[tokio::test]
async fn search_posts_credentials_and_maps_results() {
    let recorder = Recorder::default();
    let app = Router::new()
        .route("/search", post(results_handler))
        .with_state(recorder.clone());
    let addr = spawn(app).await;

    let hits = client(addr, Some("tvly-test")).search("rust", 2).await;

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].title.as_deref(), Some("Rust"));
    assert_eq!(hits[0].link.as_deref(), Some("https://www.rust-lang.org"));
    assert_eq!(hits[0].snippet.len(), 400);
    assert_eq!(hits[1].snippet, "The book");

    let body = recorder.last_body.lock().unwrap().clone().expect("request body");
    assert_eq!(body, json!({"api_key": "tvly-test", "query": "rust", "max_results": 2}));
}

#[tokio::test]
async fn missing_key_makes_no_request() {
    let recorder = Recorder::default();
    let app = Router::new()
        .route("/search", post(results_handler))
        .with_state(recorder.clone());
    let addr = spawn(app).await;

    let hits = client(addr, None).search("rust", 5).await;

    assert!(hits.is_empty());
    assert_eq!(recorder.hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn http_error_yields_empty_results() {
    let recorder = Recorder::default();
    let app = Router::new()
        .route("/search", post(failing_handler))
        .with_state(recorder.clone());
    let addr = spawn(app).await;

    let hits = client(addr, Some("tvly-test")).search("rust", 5).await;

    assert!(hits.is_empty());
    assert_eq!(recorder.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn tool_returns_pretty_json_array() {
    let recorder = Recorder::default();
    let app = Router::new()
        .route("/search", post(results_handler))
        .with_state(recorder.clone());
    let addr = spawn(app).await;

    let tool = WebSearchTool::new(client(addr, Some("tvly-test")));
    assert_eq!(tool.spec().name, "web_search");

    let output = tool.call(json!({"query": "rust"})).await.unwrap();
    assert!(output.starts_with("[\n  {"));

    let decoded: Vec<Value> = serde_json::from_str(&output).unwrap();
    assert_eq!(decoded.len(), 3);
    assert_eq!(decoded[1]["link"], "https://doc.rust-lang.org/book");

    let body = recorder.last_body.lock().unwrap().clone().unwrap();
    assert_eq!(body["max_results"], 5);
}

#[tokio::test]
async fn tool_reports_empty_array_on_failure() {
    let recorder = Recorder::default();
    let app = Router::new()
        .route("/search", post(failing_handler))
        .with_state(recorder);
    let addr = spawn(app).await;

    let tool = WebSearchTool::new(client(addr, Some("tvly-test")));
    let output = tool.call(json!({"query": "rust", "max_results": 3})).await.unwrap();
    assert_eq!(output, "[]");
}
