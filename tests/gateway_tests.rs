//! End-to-end tests: the gateway router in front of a fake Ollama server.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower::ServiceExt;

use jarvis_ai_gateway::config::Config;
use jarvis_ai_gateway::server::openai_api::{build_router, AppState};

/// Serve `router` on an ephemeral port and return its base URL.
async fn spawn_backend(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// A base URL nothing is listening on.
async fn dead_backend() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

fn gateway(base_url: String) -> Router {
    let mut config = Config::default();
    config.backend.base_url = base_url;
    let state = AppState::new(Arc::new(config)).unwrap();
    build_router(Arc::new(state))
}

fn tags_backend() -> Router {
    Router::new().route(
        "/api/tags",
        get(|| async {
            Json(json!({
                "models": [
                    {"name": "llama2", "size": 3825819519u64, "modified_at": "2024-05-01T12:00:00Z"},
                    {"name": "codellama", "size": 3825819519u64}
                ]
            }))
        }),
    )
}

fn status_backend(status: StatusCode) -> Router {
    Router::new()
        .route("/api/tags", get(move || async move { (status, "nope") }))
        .route("/api/chat", post(move || async move { (status, "model 'ghost' not found") }))
}

fn chat_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, String, String) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let content_type = resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, content_type, String::from_utf8_lossy(&body).into_owned())
}

/// Split an SSE body into its `data:` payloads.
fn sse_payloads(body: &str) -> Vec<String> {
    body.split("\n\n")
        .filter(|record| !record.trim().is_empty())
        .filter_map(|record| record.strip_prefix("data: "))
        .map(str::to_string)
        .collect()
}

fn assert_stream_terminated(payloads: &[String]) {
    let n = payloads.len();
    assert!(n >= 2, "payloads: {payloads:?}");
    let stop: Value = serde_json::from_str(&payloads[n - 2]).unwrap();
    assert_eq!(stop["object"], "chat.completion.chunk");
    assert_eq!(stop["choices"][0]["finish_reason"], "stop");
    assert_eq!(payloads[n - 1], "[DONE]");
}

// -- Root and health --

#[tokio::test]
async fn root_reports_running() {
    let app = gateway(dead_backend().await);
    let (status, _, body) = send(app, get_request("/")).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "running");
}

#[tokio::test]
async fn health_with_reachable_backend() {
    let app = gateway(spawn_backend(tags_backend()).await);
    let (status, _, body) = send(app, get_request("/health")).await;
    assert_eq!(status, StatusCode::OK);

    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["ollama_status"], "healthy");
    assert_eq!(json["service"], "myJarvis-ai-service");
    assert!(json["timestamp"].as_str().is_some());
}

#[tokio::test]
async fn health_with_unreachable_backend() {
    let app = gateway(dead_backend().await);
    let (status, _, body) = send(app, get_request("/health")).await;
    assert_eq!(status, StatusCode::OK);

    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["ollama_status"], "unhealthy");
}

#[tokio::test]
async fn health_probe_disabled_reports_unknown() {
    let mut config = Config::default();
    config.backend.base_url = dead_backend().await;
    config.backend.health_timeout_secs = 0;
    let app = build_router(Arc::new(AppState::new(Arc::new(config)).unwrap()));

    let (_, _, body) = send(app, get_request("/health")).await;
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["ollama_status"], "unknown");
}

#[tokio::test]
async fn health_with_failing_backend() {
    let app = gateway(spawn_backend(status_backend(StatusCode::INTERNAL_SERVER_ERROR)).await);
    let (_, _, body) = send(app, get_request("/health")).await;
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["ollama_status"], "unhealthy");
}

// -- Model listing --

#[tokio::test]
async fn ollama_models_returns_backend_payload() {
    let app = gateway(spawn_backend(tags_backend()).await);
    let (status, _, body) = send(app, get_request("/ollama/models")).await;
    assert_eq!(status, StatusCode::OK);

    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "success");
    assert_eq!(json["data"]["models"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn ollama_models_reports_backend_status_in_body() {
    let app = gateway(spawn_backend(status_backend(StatusCode::NOT_FOUND)).await);
    let (status, _, body) = send(app, get_request("/ollama/models")).await;
    assert_eq!(status, StatusCode::OK);

    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "error");
    assert!(json["message"].as_str().unwrap().contains("404"));
}

#[tokio::test]
async fn ollama_models_reports_connection_failure_in_body() {
    let app = gateway(dead_backend().await);
    let (status, _, body) = send(app, get_request("/ollama/models")).await;
    assert_eq!(status, StatusCode::OK);

    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "error");
    assert!(json["message"]
        .as_str()
        .unwrap()
        .starts_with("Failed to connect to Ollama"));
}

#[tokio::test]
async fn v1_models_lists_tags_in_openai_shape() {
    let app = gateway(spawn_backend(tags_backend()).await);
    let (status, _, body) = send(app, get_request("/v1/models")).await;
    assert_eq!(status, StatusCode::OK);

    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["object"], "list");
    assert_eq!(json["data"][0]["id"], "llama2");
    assert_eq!(json["data"][0]["created"], 1714564800);
    assert_eq!(json["data"][1]["id"], "codellama");
    assert_eq!(json["data"][1]["owned_by"], "ollama");
}

#[tokio::test]
async fn v1_models_propagates_unavailability() {
    let app = gateway(dead_backend().await);
    let (status, _, _) = send(app, get_request("/v1/models")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

// -- Chat completions (non-streaming) --

#[tokio::test]
async fn chat_completion_non_streaming() {
    let backend = Router::new().route(
        "/api/chat",
        post(|Json(body): Json<Value>| async move {
            let streamed = body["stream"].as_bool().unwrap_or(true);
            Json(json!({
                "model": body["model"],
                "message": {"role": "assistant", "content": format!("stream={streamed}")},
                "done": true,
                "prompt_eval_count": 26,
                "eval_count": 298
            }))
        }),
    );
    let app = gateway(spawn_backend(backend).await);

    let (status, _, body) = send(
        app,
        chat_request(json!({
            "model": "llama3",
            "messages": [
                {"role": "system", "content": "You are a helpful assistant"},
                {"role": "user", "content": "Who are you?"}
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "body: {body}");

    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["object"], "chat.completion");
    assert_eq!(json["model"], "llama3");
    assert!(json["id"].as_str().unwrap().starts_with("chatcmpl-"));
    assert_eq!(json["choices"][0]["message"]["role"], "assistant");
    assert_eq!(json["choices"][0]["message"]["content"], "stream=false");
    assert_eq!(json["choices"][0]["finish_reason"], "stop");
    assert_eq!(json["usage"]["prompt_tokens"], 26);
    assert_eq!(json["usage"]["completion_tokens"], 298);
    assert_eq!(json["usage"]["total_tokens"], 324);
}

#[tokio::test]
async fn chat_completion_accepts_generate_shape() {
    let backend = Router::new().route(
        "/api/chat",
        post(|| async {
            Json(json!({
                "model": "llama2",
                "response": "Hello! How can I help you today?",
                "done": true
            }))
        }),
    );
    let app = gateway(spawn_backend(backend).await);

    let (status, _, body) = send(
        app,
        chat_request(json!({
            "model": "llama2",
            "messages": [{"role": "user", "content": "Hello"}]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(
        json["choices"][0]["message"]["content"],
        "Hello! How can I help you today?"
    );
    assert_eq!(json["usage"]["total_tokens"], 0);
}

#[tokio::test]
async fn chat_completion_backend_unavailable() {
    let app = gateway(dead_backend().await);
    let (status, _, body) = send(
        app,
        chat_request(json!({
            "model": "llama2",
            "messages": [{"role": "user", "content": "Hello"}]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["error"]["type"], "service_unavailable");
    assert!(json["error"]["message"]
        .as_str()
        .unwrap()
        .contains("Ollama service unavailable"));
}

#[tokio::test]
async fn chat_completion_propagates_backend_status() {
    let app = gateway(spawn_backend(status_backend(StatusCode::NOT_FOUND)).await);
    let (status, _, body) = send(
        app,
        chat_request(json!({
            "model": "ghost",
            "messages": [{"role": "user", "content": "Hello"}]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let json: Value = serde_json::from_str(&body).unwrap();
    assert!(json["error"]["message"]
        .as_str()
        .unwrap()
        .contains("model 'ghost' not found"));
}

#[tokio::test]
async fn chat_completion_rejects_invalid_requests() {
    let base = dead_backend().await;

    for (body, expected) in [
        (json!({"model": "llama2", "messages": []}), StatusCode::BAD_REQUEST),
        (
            json!({"model": "", "messages": [{"role": "user", "content": "hi"}]}),
            StatusCode::BAD_REQUEST,
        ),
        (
            json!({"model": "llama2", "messages": [{"role": "wizard", "content": "hi"}]}),
            StatusCode::UNPROCESSABLE_ENTITY,
        ),
        (
            json!({"messages": [{"role": "user", "content": "hi"}]}),
            StatusCode::UNPROCESSABLE_ENTITY,
        ),
    ] {
        let (status, _, text) = send(gateway(base.clone()), chat_request(body.clone())).await;
        assert_eq!(status, expected, "request {body}: {text}");
        let json: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["error"]["type"], "invalid_request_error");
        assert_eq!(json["error"]["code"], expected.as_u16());
    }
}

#[tokio::test]
async fn chat_completion_keeps_extractor_status() {
    let app = gateway(dead_backend().await);

    let missing_type = Request::builder()
        .method("POST")
        .uri("/chat/completions")
        .body(Body::from(
            json!({"model": "llama2", "messages": [{"role": "user", "content": "hi"}]}).to_string(),
        ))
        .unwrap();
    let (status, _, text) = send(app.clone(), missing_type).await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let json: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["error"]["type"], "invalid_request_error");

    let broken_json = Request::builder()
        .method("POST")
        .uri("/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from("{\"model\": "))
        .unwrap();
    let (status, _, _) = send(app, broken_json).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn chat_completion_accepts_whitespace_model_name() {
    // Any non-empty model string passes validation and reaches the backend.
    let app = gateway(dead_backend().await);
    let (status, _, _) = send(
        app,
        chat_request(json!({"model": " ", "messages": [{"role": "user", "content": "hi"}]})),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

// -- Chat completions (streaming) --

#[tokio::test]
async fn chat_streaming_translates_ndjson() {
    let backend = Router::new().route(
        "/api/chat",
        post(|| async {
            let parts: Vec<Result<&'static str, Infallible>> = vec![
                Ok("{\"model\":\"llama3\",\"message\":{\"role\":\"assistant\",\"content\":\"Hel"),
                Ok("lo\"},\"done\":false}\n{bad\n"),
                Ok("{\"model\":\"llama3\",\"message\":{\"role\":\"assistant\",\"content\":\" there!\"},\"done\":false}\n"),
                Ok("\n{also bad}\n"),
                Ok("{\"model\":\"llama3\",\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true,\"eval_count\":2}\n"),
            ];
            Body::from_stream(futures::stream::iter(parts))
        }),
    );
    let app = gateway(spawn_backend(backend).await);

    let (status, content_type, body) = send(
        app.clone(),
        chat_request(json!({
            "model": "llama3",
            "messages": [{"role": "user", "content": "Hi"}],
            "stream": true
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(content_type.contains("text/event-stream"));

    let payloads = sse_payloads(&body);
    assert_eq!(payloads.len(), 4, "payloads: {payloads:?}");

    let first: Value = serde_json::from_str(&payloads[0]).unwrap();
    let second: Value = serde_json::from_str(&payloads[1]).unwrap();
    assert_eq!(first["choices"][0]["delta"]["content"], "Hello");
    assert_eq!(first["choices"][0]["delta"]["role"], "assistant");
    assert_eq!(second["choices"][0]["delta"]["content"], " there!");
    assert!(second["choices"][0]["finish_reason"].is_null());
    assert_eq!(first["id"], second["id"]);
    assert!(first["id"].as_str().unwrap().starts_with("chatcmpl-"));

    assert_stream_terminated(&payloads);

    // The /v1 alias serves the same handler.
    let req = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"model": "llama3", "messages": [{"role": "user", "content": "Hi"}], "stream": true})
                .to_string(),
        ))
        .unwrap();
    let (status, _, body) = send(app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_stream_terminated(&sse_payloads(&body));
}

#[tokio::test]
async fn chat_streaming_backend_unavailable() {
    let app = gateway(dead_backend().await);
    let (status, content_type, body) = send(
        app,
        chat_request(json!({
            "model": "llama2",
            "messages": [{"role": "user", "content": "Hi"}],
            "stream": true
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(content_type.contains("text/event-stream"));

    let payloads = sse_payloads(&body);
    assert_eq!(payloads.len(), 3, "payloads: {payloads:?}");

    let error: Value = serde_json::from_str(&payloads[0]).unwrap();
    assert_eq!(error["error"]["type"], "service_unavailable");
    assert_eq!(error["error"]["code"], 503);

    assert_stream_terminated(&payloads);
}

#[tokio::test]
async fn chat_streaming_backend_status_is_internal_error() {
    let app = gateway(spawn_backend(status_backend(StatusCode::NOT_FOUND)).await);
    let (status, _, body) = send(
        app,
        chat_request(json!({
            "model": "ghost",
            "messages": [{"role": "user", "content": "Hi"}],
            "stream": true
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let payloads = sse_payloads(&body);
    let error: Value = serde_json::from_str(&payloads[0]).unwrap();
    assert_eq!(error["error"]["type"], "internal_server_error");
    assert_eq!(error["error"]["code"], 500);
    assert_stream_terminated(&payloads);
}
