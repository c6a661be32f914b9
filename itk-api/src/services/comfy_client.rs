//! Rendering backend session
//!
//! Drives one workflow execution on the node-graph backend:
//! 1. Readiness probe: poll the base endpoint until it answers
//! 2. Stream handshake: open the WebSocket event stream for our client id
//! 3. Submit the graph, wait for the completion event for that submission
//! 4. Query the execution history and collect produced files per node
//!
//! Exhausting the retry ceilings of steps 1 and 2 is logged, not fatal: the
//! backend often shares the deployment unit and may still be starting, so
//! submission is attempted regardless.

use async_trait::async_trait;
use futures::StreamExt;
use itk_common::config::BackendConfig;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::services::graph_template::Graph;

/// Timeout of the single-shot health probe
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Backend errors
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Backend unavailable after {attempts} attempt(s): {reason}")]
    Unavailable { attempts: u32, reason: String },

    #[error("Backend request failed: {0}")]
    Http(String),

    #[error("Backend rejected workflow (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Event stream unusable: {0}")]
    Stream(String),

    #[error("Backend execution failed: {0}")]
    Execution(String),

    #[error("Unexpected backend response: {0}")]
    Protocol(String),
}

/// Files produced by one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeArtifacts {
    pub node_id: String,
    pub files: Vec<PathBuf>,
}

/// First file of the first node that produced any
///
/// Node order is whatever the backend reports; callers must not rely on a
/// particular node winning when several produce files.
pub fn first_artifact(outputs: &[NodeArtifacts]) -> Option<(&str, &PathBuf)> {
    outputs
        .iter()
        .find_map(|node| node.files.first().map(|file| (node.node_id.as_str(), file)))
}

/// Execution seam between the job pipeline and the rendering backend
#[async_trait]
pub trait RenderBackend: Send + Sync {
    /// Single quick reachability check (health endpoint)
    async fn probe(&self) -> Result<(), BackendError>;

    /// Execute `graph` to completion and return produced files per node
    async fn execute(&self, job_id: Uuid, graph: &Graph) -> Result<Vec<NodeArtifacts>, BackendError>;
}

type EventStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Event-stream message relevant to one submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Execution of `prompt_id` finished
    Finished { prompt_id: String },
    /// Execution of `prompt_id` raised an error
    Failed { prompt_id: String, message: String },
    /// Progress, status, and other traffic
    Other,
}

#[derive(Debug, Deserialize)]
struct RawStreamMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

/// Classify one text frame of the event stream
pub fn parse_stream_event(text: &str) -> StreamEvent {
    let Ok(message) = serde_json::from_str::<RawStreamMessage>(text) else {
        return StreamEvent::Other;
    };
    let prompt_id = || {
        message
            .data
            .get("prompt_id")
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    match message.kind.as_str() {
        // `executing` with a null node marks the end of the run
        "executing" if message.data.get("node").map_or(false, Value::is_null) => {
            prompt_id().map_or(StreamEvent::Other, |prompt_id| StreamEvent::Finished { prompt_id })
        }
        "execution_error" => match prompt_id() {
            Some(prompt_id) => {
                let node = message.data.get("node_id").and_then(Value::as_str).unwrap_or("?");
                let detail = message
                    .data
                    .get("exception_message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error");
                StreamEvent::Failed {
                    prompt_id,
                    message: format!("node {}: {}", node, detail.trim()),
                }
            }
            None => StreamEvent::Other,
        },
        _ => StreamEvent::Other,
    }
}

#[derive(Debug, Deserialize)]
struct QueueResponse {
    prompt_id: String,
}

#[derive(Debug, Deserialize)]
struct OutputFile {
    #[serde(default)]
    fullpath: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct NodeOutput {
    #[serde(default)]
    gifs: Vec<OutputFile>,
    #[serde(default)]
    videos: Vec<OutputFile>,
}

/// Collect produced files per node from a history response
pub fn parse_history(prompt_id: &str, body: &Value) -> Result<Vec<NodeArtifacts>, BackendError> {
    let Some(outputs) = body
        .get(prompt_id)
        .and_then(|entry| entry.get("outputs"))
        .and_then(Value::as_object)
    else {
        return Err(BackendError::Protocol(format!(
            "history has no outputs for prompt {}",
            prompt_id
        )));
    };

    let artifacts = outputs
        .iter()
        .map(|(node_id, raw)| {
            let output: NodeOutput = serde_json::from_value(raw.clone()).unwrap_or_default();
            let files = output
                .gifs
                .into_iter()
                .chain(output.videos)
                .filter_map(|file| file.fullpath)
                .map(PathBuf::from)
                .collect();
            NodeArtifacts {
                node_id: node_id.clone(),
                files,
            }
        })
        .collect();
    Ok(artifacts)
}

/// HTTP + WebSocket client for a ComfyUI-style backend
pub struct ComfyClient {
    config: BackendConfig,
    client_id: String,
    http_client: reqwest::Client,
}

impl ComfyClient {
    /// Create a client; `client_id` identifies this process on the event stream
    pub fn new(config: BackendConfig, client_id: impl Into<String>) -> Result<Self, BackendError> {
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| BackendError::Http(e.to_string()))?;

        Ok(Self {
            config,
            client_id: client_id.into(),
            http_client,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url(), path)
    }

    /// Poll the base endpoint until it answers successfully
    ///
    /// Returns the attempt number that succeeded.
    pub async fn wait_until_ready(&self) -> Result<u32, BackendError> {
        let url = self.config.base_url();
        let attempts = self.config.readiness_attempts;
        let mut last_error = String::from("no attempts configured");

        for attempt in 1..=attempts {
            let result = self
                .http_client
                .get(&url)
                .timeout(self.config.probe_timeout())
                .send()
                .await
                .and_then(|response| response.error_for_status());

            match result {
                Ok(_) => {
                    info!(attempt, "Backend ready");
                    return Ok(attempt);
                }
                Err(e) => {
                    debug!(attempt, error = %e, "Backend not ready yet");
                    last_error = e.to_string();
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.readiness_interval()).await;
            }
        }

        Err(BackendError::Unavailable {
            attempts,
            reason: last_error,
        })
    }

    /// Open the event stream, retrying connection establishment
    pub async fn connect_stream(&self) -> Result<EventStream, BackendError> {
        let url = self.config.stream_url(&self.client_id);
        let attempts = self.config.stream_attempts;
        let mut last_error = String::from("no attempts configured");

        for attempt in 1..=attempts {
            match tokio_tungstenite::connect_async(url.as_str()).await {
                Ok((stream, _response)) => {
                    debug!(attempt, "Event stream connected");
                    return Ok(stream);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Event stream connect failed");
                    last_error = e.to_string();
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.stream_interval()).await;
            }
        }

        Err(BackendError::Unavailable {
            attempts,
            reason: last_error,
        })
    }

    /// Submit a graph for execution, returning the backend's prompt id
    pub async fn queue_prompt(&self, graph: &Graph) -> Result<String, BackendError> {
        let payload = json!({ "prompt": graph, "client_id": self.client_id });
        let response = self
            .http_client
            .post(self.endpoint("prompt"))
            .json(&payload)
            .send()
            .await
            .map_err(|e| BackendError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let queued: QueueResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Protocol(e.to_string()))?;
        Ok(queued.prompt_id)
    }

    /// Consume the event stream until `prompt_id` finishes
    async fn await_completion(stream: &mut EventStream, prompt_id: &str) -> Result<(), BackendError> {
        while let Some(message) = stream.next().await {
            let message = message.map_err(|e| BackendError::Stream(e.to_string()))?;
            match message {
                Message::Text(text) => match parse_stream_event(&text) {
                    StreamEvent::Finished { prompt_id: id } if id == prompt_id => return Ok(()),
                    StreamEvent::Failed { prompt_id: id, message } if id == prompt_id => {
                        return Err(BackendError::Execution(message))
                    }
                    _ => {}
                },
                // Binary frames carry live previews
                Message::Binary(_) => {}
                Message::Close(_) => {
                    return Err(BackendError::Stream("closed before completion".to_string()))
                }
                _ => {}
            }
        }
        Err(BackendError::Stream("ended before completion".to_string()))
    }

    /// Produced files per node for a finished submission
    pub async fn history(&self, prompt_id: &str) -> Result<Vec<NodeArtifacts>, BackendError> {
        let response = self
            .http_client
            .get(self.endpoint(&format!("history/{}", prompt_id)))
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| BackendError::Http(e.to_string()))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| BackendError::Protocol(e.to_string()))?;
        parse_history(prompt_id, &body)
    }
}

#[async_trait]
impl RenderBackend for ComfyClient {
    async fn probe(&self) -> Result<(), BackendError> {
        self.http_client
            .get(self.config.base_url())
            .timeout(HEALTH_PROBE_TIMEOUT)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map(|_| ())
            .map_err(|e| BackendError::Http(e.to_string()))
    }

    async fn execute(&self, job_id: Uuid, graph: &Graph) -> Result<Vec<NodeArtifacts>, BackendError> {
        if let Err(e) = self.wait_until_ready().await {
            warn!(job_id = %job_id, error = %e, "Backend readiness not confirmed, submitting anyway");
        }

        let stream = match self.connect_stream().await {
            Ok(stream) => Some(stream),
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Event stream not connected, submitting anyway");
                None
            }
        };

        let prompt_id = self.queue_prompt(graph).await?;
        info!(job_id = %job_id, prompt_id = %prompt_id, nodes = graph.len(), "Workflow queued");

        let Some(mut stream) = stream else {
            return Err(BackendError::Stream(
                "no event stream to observe completion".to_string(),
            ));
        };
        Self::await_completion(&mut stream, &prompt_id).await?;
        if let Err(e) = stream.close(None).await {
            debug!(job_id = %job_id, error = %e, "Event stream close failed");
        }

        let outputs = self.history(&prompt_id).await?;
        info!(
            job_id = %job_id,
            prompt_id = %prompt_id,
            producing_nodes = outputs.iter().filter(|n| !n.files.is_empty()).count(),
            "Workflow finished"
        );
        Ok(outputs)
    }
}
