use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use briefline_core::usage::Usage;
use briefline_core::{
    BriefError, ChatMessage, ChatModel, ChatRequest, LlmSettings, OpenAiChatClient, SecretValue,
    ToolSpec,
};
use serde_json::{Value, json};
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct Captured {
    auth: Arc<Mutex<Option<String>>>,
    body: Arc<Mutex<Option<Value>>>,
}

async fn completions(State(captured): State<Captured>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    *captured.auth.lock().unwrap() = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    *captured.body.lock().unwrap() = Some(body);

    Json(json!({
        "id": "chatcmpl-1",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": "Findings ready."}}],
        "usage": {"prompt_tokens": 20, "completion_tokens": 7, "total_tokens": 27}
    }))
    .into_response()
}

async fn overloaded() -> (StatusCode, &'static str) {
    (StatusCode::SERVICE_UNAVAILABLE, "model overloaded")
}

async fn spawn(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn settings(addr: SocketAddr) -> LlmSettings {
    LlmSettings {
        model: "gpt-test".into(),
        api_key: SecretValue::new("sk-integration"),
        base_url: format!("http://{addr}/v1"),
        timeout: Duration::from_secs(5),
        max_tool_rounds: 2,
    }
}

#[tokio::test]
async fn completion_sends_bearer_and_parses_usage() {
    let captured = Captured::default();
    let app = Router::new()
        .route("/v1/chat/completions", post(completions))
        .with_state(captured.clone());
    let addr = spawn(app).await;

    let client = OpenAiChatClient::new(&settings(addr)).unwrap();
    assert_eq!(client.model_name(), "gpt-test");

    let request = ChatRequest {
        messages: vec![
            ChatMessage::System("You are a research agent.".into()),
            ChatMessage::User("Research rust".into()),
        ],
        tools: vec![ToolSpec {
            name: "web_search".into(),
            description: "Usage: web_search(query: str, max_results: int=5)".into(),
            parameters: json!({"type": "object"}),
        }],
    };
    let response = client.complete(&request).await.unwrap();

    assert_eq!(response.content.as_deref(), Some("Findings ready."));
    assert!(response.tool_calls.is_empty());
    assert_eq!(response.usage.as_ref().map(|u| u.total_tokens().unwrap()), Some(27));
    assert!(matches!(response.usage, Some(Usage::Counts(_))));

    assert_eq!(
        captured.auth.lock().unwrap().as_deref(),
        Some("Bearer sk-integration")
    );
    let body = captured.body.lock().unwrap().clone().unwrap();
    assert_eq!(body["model"], "gpt-test");
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][1]["content"], "Research rust");
    assert_eq!(body["tools"][0]["function"]["name"], "web_search");
}

#[tokio::test]
async fn http_failure_maps_to_backend_error() {
    let app = Router::new().route("/v1/chat/completions", post(overloaded));
    let addr = spawn(app).await;

    let client = OpenAiChatClient::new(&settings(addr)).unwrap();
    let err = client
        .complete(&ChatRequest {
            messages: vec![ChatMessage::User("hi".into())],
            tools: Vec::new(),
        })
        .await
        .unwrap_err();

    match err {
        BriefError::Backend { status, detail } => {
            assert_eq!(status, 503);
            assert_eq!(detail, "model overloaded");
        }
        other => panic!("unexpected error: {other}"),
    }
}
