//! Shared fixtures for integration tests
//!
//! A deterministic stub backend and stub audio tools wired into a real
//! pipeline over temporary directories.

#![allow(dead_code)]

use async_trait::async_trait;
use itk_api::models::{Job, JobStatus, PersonCount, InputType};
use itk_api::services::audio_tools::{AudioError, AudioTools};
use itk_api::services::comfy_client::{BackendError, NodeArtifacts, RenderBackend};
use itk_api::services::{
    Graph, InMemoryJobStore, JobExecutor, LocalMediaResolver, OutputMaterializer, Pipeline,
    TemplateCatalog, TemplateKey,
};
use itk_api::{build_router, AppState};
use itk_common::config::PathsConfig;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

/// Bytes every stub render produces
pub const RENDERED_BYTES: &[u8] = b"stub rendered video";

/// What the stub backend does on `execute`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendBehavior {
    /// Write a video and report it on node 131
    Produce,
    /// Finish without producing files
    ProduceNothing,
    /// Report a file that does not exist
    ReportMissingFile,
    /// Fail the execution
    Fail,
}

pub struct StubBackend {
    behavior: BackendBehavior,
    reachable: bool,
    output_dir: PathBuf,
    graphs: Mutex<Vec<(Uuid, Graph)>>,
}

impl StubBackend {
    pub fn new(behavior: BackendBehavior, output_dir: PathBuf) -> Self {
        Self {
            behavior,
            reachable: true,
            output_dir,
            graphs: Mutex::new(Vec::new()),
        }
    }

    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    /// Graphs received so far, with the job they were submitted for
    pub fn submitted(&self) -> Vec<(Uuid, Graph)> {
        self.graphs.lock().unwrap().clone()
    }

    pub fn last_graph(&self) -> Graph {
        self.submitted().pop().expect("no graph submitted").1
    }
}

#[async_trait]
impl RenderBackend for StubBackend {
    async fn probe(&self) -> Result<(), BackendError> {
        if self.reachable {
            Ok(())
        } else {
            Err(BackendError::Http("connection refused".into()))
        }
    }

    async fn execute(&self, job_id: Uuid, graph: &Graph) -> Result<Vec<NodeArtifacts>, BackendError> {
        self.graphs.lock().unwrap().push((job_id, graph.clone()));

        match self.behavior {
            BackendBehavior::Produce => {
                let path = self.output_dir.join(format!("render_{}.mp4", job_id));
                tokio::fs::write(&path, RENDERED_BYTES).await.unwrap();
                Ok(vec![
                    NodeArtifacts { node_id: "120".into(), files: vec![] },
                    NodeArtifacts { node_id: "131".into(), files: vec![path] },
                ])
            }
            BackendBehavior::ProduceNothing => Ok(vec![NodeArtifacts {
                node_id: "131".into(),
                files: vec![],
            }]),
            BackendBehavior::ReportMissingFile => Ok(vec![NodeArtifacts {
                node_id: "131".into(),
                files: vec![self.output_dir.join("never_written.mp4")],
            }]),
            BackendBehavior::Fail => Err(BackendError::Execution("node 194: out of memory".into())),
        }
    }
}

/// Audio tools reporting one fixed duration for every file
pub struct StubAudio {
    pub duration: Option<f64>,
    pub silences: Mutex<Vec<f64>>,
}

impl StubAudio {
    pub fn new(duration: Option<f64>) -> Self {
        Self {
            duration,
            silences: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl AudioTools for StubAudio {
    async fn duration_seconds(&self, _path: &Path) -> Option<f64> {
        self.duration
    }

    async fn generate_silence(&self, seconds: f64, output: &Path) -> Result<PathBuf, AudioError> {
        self.silences.lock().unwrap().push(seconds);
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(output, b"silence").await?;
        Ok(output.to_path_buf())
    }
}

/// Template carrying every node the slot table knows
pub fn full_template() -> Graph {
    let ids = [
        "284", "228", "125", "307", "313", "241", "245", "246", "270", "192", "194", "131", "301",
    ];
    let nodes: serde_json::Map<String, serde_json::Value> = ids
        .iter()
        .map(|id| (id.to_string(), json!({ "class_type": format!("Node{}", id), "inputs": {} })))
        .collect();
    Graph::from_json(serde_json::Value::Object(nodes)).unwrap()
}

pub fn full_catalog(dir: &Path) -> TemplateCatalog {
    let templates: HashMap<TemplateKey, Graph> = [InputType::Image, InputType::Video]
        .into_iter()
        .flat_map(|input| {
            [PersonCount::Single, PersonCount::Multi]
                .into_iter()
                .map(move |persons| (TemplateKey::new(input, persons), full_template()))
        })
        .collect();
    TemplateCatalog::from_templates(dir.to_path_buf(), templates)
}

/// Pipeline over temporary directories
pub struct TestEnv {
    pub root: TempDir,
    pub paths: PathsConfig,
    pub backend: Arc<StubBackend>,
    pub audio: Arc<StubAudio>,
    pub executor: JobExecutor,
}

impl TestEnv {
    pub fn new(behavior: BackendBehavior) -> Self {
        Self::build(behavior, Some(6.0), true)
    }

    pub fn with_audio_duration(behavior: BackendBehavior, duration: Option<f64>) -> Self {
        Self::build(behavior, duration, true)
    }

    pub fn with_unreachable_backend() -> Self {
        Self::build(BackendBehavior::Produce, Some(6.0), false)
    }

    fn build(behavior: BackendBehavior, duration: Option<f64>, reachable: bool) -> Self {
        let root = tempfile::tempdir().unwrap();
        let paths = PathsConfig {
            templates_dir: root.path().join("templates"),
            examples_dir: root.path().join("examples"),
            work_dir: root.path().join("work"),
            network_volume_dir: root.path().join("volume"),
        };
        let output_dir = root.path().join("output");
        for dir in [&paths.examples_dir, &paths.work_dir, &output_dir] {
            std::fs::create_dir_all(dir).unwrap();
        }
        for asset in ["image.jpg", "video.mp4", "audio.mp3"] {
            std::fs::write(paths.examples_dir.join(asset), b"example").unwrap();
        }

        let mut backend = StubBackend::new(behavior, output_dir);
        if !reachable {
            backend = backend.unreachable();
        }
        let backend = Arc::new(backend);
        let audio = Arc::new(StubAudio::new(duration));

        let pipeline = Arc::new(Pipeline {
            resolver: Arc::new(LocalMediaResolver::new(paths.work_dir.clone()).unwrap()),
            audio: audio.clone(),
            templates: Arc::new(full_catalog(&paths.templates_dir)),
            backend: backend.clone(),
            materializer: Arc::new(OutputMaterializer::new(paths.network_volume_dir.clone())),
            paths: paths.clone(),
        });
        let executor = JobExecutor::new(Arc::new(InMemoryJobStore::new()), pipeline);

        Self {
            root,
            paths,
            backend,
            audio,
            executor,
        }
    }

    pub fn router(&self) -> axum::Router {
        build_router(AppState::new(self.executor.clone()))
    }

    /// Write a caller-supplied media file
    pub fn media_file(&self, name: &str) -> PathBuf {
        let path = self.root.path().join(name);
        std::fs::write(&path, b"caller media").unwrap();
        path
    }
}

/// Poll until the job reaches a terminal state
pub async fn wait_for_terminal(executor: &JobExecutor, id: Uuid) -> Job {
    for _ in 0..500 {
        if let Some(job) = executor.get_status(id).await {
            if job.status == JobStatus::Completed || job.status == JobStatus::Failed {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} did not finish", id);
}
