//! Backend session tests against an in-process mock backend
//!
//! The mock speaks the same HTTP + WebSocket protocol: `GET /` for
//! readiness, `/ws` for events, `POST /prompt`, `GET /history/:id`.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use itk_api::services::comfy_client::{BackendError, ComfyClient, RenderBackend};
use itk_api::services::Graph;
use itk_common::config::BackendConfig;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use uuid::Uuid;

const PROMPT_ID: &str = "prompt-1";

#[derive(Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    ExecutionError,
}

#[derive(Clone)]
struct MockState {
    outcome: Outcome,
    queued: Arc<Notify>,
    submissions: Arc<Mutex<Vec<Value>>>,
    stream_clients: Arc<Mutex<Vec<String>>>,
    /// Readiness requests still to refuse
    refuse_ready: Arc<AtomicU32>,
    /// Stream handshakes still to refuse
    refuse_stream: Arc<AtomicU32>,
    ready_requests: Arc<AtomicU32>,
}

/// Decrement `counter` if positive, reporting whether it was
fn take_refusal(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

async fn root(State(state): State<MockState>) -> Response {
    state.ready_requests.fetch_add(1, Ordering::SeqCst);
    if take_refusal(&state.refuse_ready) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    "ok".into_response()
}

async fn queue_prompt(State(state): State<MockState>, Json(body): Json<Value>) -> Json<Value> {
    state.submissions.lock().unwrap().push(body);
    state.queued.notify_one();
    Json(json!({ "prompt_id": PROMPT_ID, "number": 1, "node_errors": {} }))
}

async fn history(Path(id): Path<String>) -> Json<Value> {
    Json(json!({
        id: {
            "outputs": {
                "9": { "images": [{ "filename": "preview.png" }] },
                "131": { "gifs": [{ "filename": "out.mp4", "fullpath": "/output/out.mp4" }] }
            }
        }
    }))
}

async fn events(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<MockState>,
) -> Response {
    if take_refusal(&state.refuse_stream) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    if let Some(client_id) = params.get("clientId") {
        state.stream_clients.lock().unwrap().push(client_id.clone());
    }
    ws.on_upgrade(move |socket| stream_events(socket, state))
        .into_response()
}

async fn stream_events(mut socket: WebSocket, state: MockState) {
    let status = json!({ "type": "status", "data": { "status": { "exec_info": { "queue_remaining": 0 } } } });
    if socket.send(Message::Text(status.to_string())).await.is_err() {
        return;
    }
    state.queued.notified().await;

    let mut frames = vec![
        Message::Text(json!({ "type": "executing", "data": { "node": "131", "prompt_id": PROMPT_ID } }).to_string()),
        Message::Binary(vec![1, 2, 3, 4]),
        // Completion of an unrelated submission
        Message::Text(json!({ "type": "executing", "data": { "node": null, "prompt_id": "other" } }).to_string()),
    ];
    frames.push(match state.outcome {
        Outcome::Success => Message::Text(
            json!({ "type": "executing", "data": { "node": null, "prompt_id": PROMPT_ID } }).to_string(),
        ),
        Outcome::ExecutionError => Message::Text(
            json!({
                "type": "execution_error",
                "data": { "prompt_id": PROMPT_ID, "node_id": "194", "exception_message": "out of memory" }
            })
            .to_string(),
        ),
    });

    for frame in frames {
        if socket.send(frame).await.is_err() {
            return;
        }
    }
    // Keep the socket open until the client closes it
    while let Some(Ok(_)) = socket.recv().await {}
}

async fn spawn_mock(outcome: Outcome) -> (BackendConfig, MockState) {
    spawn_refusing_mock(outcome, 0, 0).await
}

/// Mock that refuses the first `ready_refusals` readiness requests and `stream_refusals` handshakes
async fn spawn_refusing_mock(
    outcome: Outcome,
    ready_refusals: u32,
    stream_refusals: u32,
) -> (BackendConfig, MockState) {
    let state = MockState {
        outcome,
        queued: Arc::new(Notify::new()),
        submissions: Arc::new(Mutex::new(Vec::new())),
        stream_clients: Arc::new(Mutex::new(Vec::new())),
        refuse_ready: Arc::new(AtomicU32::new(ready_refusals)),
        refuse_stream: Arc::new(AtomicU32::new(stream_refusals)),
        ready_requests: Arc::new(AtomicU32::new(0)),
    };
    let app = Router::new()
        .route("/", get(root))
        .route("/ws", get(events))
        .route("/prompt", post(queue_prompt))
        .route("/history/:id", get(history))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let config = BackendConfig {
        address: "127.0.0.1".to_string(),
        port,
        readiness_attempts: 3,
        readiness_interval_ms: 10,
        stream_attempts: 3,
        stream_interval_ms: 10,
        probe_timeout_ms: 1000,
    };
    (config, state)
}

fn sample_graph() -> Graph {
    Graph::from_json(json!({
        "270": { "class_type": "INTConstant", "inputs": { "value": 331 } }
    }))
    .unwrap()
}

#[tokio::test]
async fn test_execute_collects_outputs_after_completion() {
    let (config, state) = spawn_mock(Outcome::Success).await;
    let client = ComfyClient::new(config, "client-under-test").unwrap();

    client.probe().await.unwrap();
    let outputs = client.execute(Uuid::new_v4(), &sample_graph()).await.unwrap();

    let node = outputs.iter().find(|n| n.node_id == "131").unwrap();
    assert_eq!(node.files, vec![std::path::PathBuf::from("/output/out.mp4")]);
    assert!(outputs.iter().find(|n| n.node_id == "9").unwrap().files.is_empty());

    let submissions = state.submissions.lock().unwrap().clone();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0]["client_id"], "client-under-test");
    assert_eq!(submissions[0]["prompt"]["270"]["inputs"]["value"], 331);
    assert_eq!(*state.stream_clients.lock().unwrap(), vec!["client-under-test".to_string()]);
}

#[tokio::test]
async fn test_execution_error_fails_the_run() {
    let (config, _state) = spawn_mock(Outcome::ExecutionError).await;
    let client = ComfyClient::new(config, "client-under-test").unwrap();

    let err = client.execute(Uuid::new_v4(), &sample_graph()).await.unwrap_err();
    match err {
        BackendError::Execution(message) => assert!(message.contains("out of memory"), "{}", message),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_readiness_succeeds_on_first_attempt() {
    let (config, _state) = spawn_mock(Outcome::Success).await;
    let client = ComfyClient::new(config, "client-under-test").unwrap();
    assert_eq!(client.wait_until_ready().await.unwrap(), 1);
}

#[tokio::test]
async fn test_readiness_succeeds_after_refusals() {
    let (config, state) = spawn_refusing_mock(Outcome::Success, 2, 0).await;
    let client = ComfyClient::new(config, "client-under-test").unwrap();

    assert_eq!(client.wait_until_ready().await.unwrap(), 3);
    assert_eq!(state.ready_requests.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_readiness_gives_up_at_ceiling() {
    let (config, state) = spawn_refusing_mock(Outcome::Success, 10, 0).await;
    let client = ComfyClient::new(config, "client-under-test").unwrap();

    match client.wait_until_ready().await.unwrap_err() {
        BackendError::Unavailable { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(state.ready_requests.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_stream_handshake_retries_after_refusal() {
    let (config, state) = spawn_refusing_mock(Outcome::Success, 0, 2).await;
    let client = ComfyClient::new(config, "client-under-test").unwrap();

    let stream = client.connect_stream().await.unwrap();
    drop(stream);
    assert_eq!(state.refuse_stream.load(Ordering::SeqCst), 0);
    assert_eq!(*state.stream_clients.lock().unwrap(), vec!["client-under-test".to_string()]);
}

#[tokio::test]
async fn test_execute_survives_slow_startup() {
    let (config, state) = spawn_refusing_mock(Outcome::Success, 1, 1).await;
    let client = ComfyClient::new(config, "client-under-test").unwrap();

    let outputs = client.execute(Uuid::new_v4(), &sample_graph()).await.unwrap();
    assert!(outputs.iter().any(|n| n.node_id == "131" && !n.files.is_empty()));
    assert_eq!(state.submissions.lock().unwrap().len(), 1);
}
