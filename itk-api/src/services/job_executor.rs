//! Job Executor
//!
//! Runs the generation pipeline for one request:
//! 1. Resolve media and audio references (example assets when absent)
//! 2. Measure audio and derive timing
//! 3. Parameterize a fresh template copy
//! 4. Execute on the rendering backend and harvest the artifact
//! 5. Optionally persist the artifact to the network volume
//!
//! [`JobExecutor::submit`] runs the pipeline on its own tokio task and records
//! the result in the [`JobStore`]; [`JobExecutor::run_sync`] runs it inline.

use itk_common::config::{JobsConfig, PathsConfig};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::{
    Artifact, GenerationRequest, InputType, Job, JobOutput, JobUpdate, MediaReference, ReferenceKind,
};
use crate::services::audio_tools::{AudioError, AudioTools};
use crate::services::comfy_client::{first_artifact, BackendError, NodeArtifacts, RenderBackend};
use crate::services::graph_template::{self, TemplateCatalog, TemplateError, TemplateKey, TemplateParams};
use crate::services::job_store::JobStore;
use crate::services::media_resolver::{scratch_dir, MediaResolver, ResolutionError};
use crate::services::output_materializer::{MaterializationError, OutputMaterializer};
use crate::services::parameter_deriver::{self, AudioMeasurements};

/// Bundled example assets
pub const EXAMPLE_IMAGE: &str = "image.jpg";
pub const EXAMPLE_VIDEO: &str = "video.mp4";
pub const EXAMPLE_AUDIO: &str = "audio.mp3";

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Media resolution failed: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Rendering backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Workflow finished but no output produced")]
    NoOutputProduced,

    #[error("Rendering backend error: {0}")]
    Backend(String),

    #[error("Workflow template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Audio preparation failed: {0}")]
    Audio(#[from] AudioError),

    #[error("Output persistence failed: {0}")]
    Output(#[from] MaterializationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<BackendError> for PipelineError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unavailable { .. } => PipelineError::BackendUnavailable(err.to_string()),
            other => PipelineError::Backend(other.to_string()),
        }
    }
}

/// Audio tracks handed to the backend
#[derive(Debug, Clone, PartialEq)]
struct ResolvedAudio {
    primary: PathBuf,
    secondary: Option<PathBuf>,
    /// Caller supplied the primary track
    provided: bool,
}

/// Components the pipeline drives
pub struct Pipeline {
    pub resolver: Arc<dyn MediaResolver>,
    pub audio: Arc<dyn AudioTools>,
    pub templates: Arc<TemplateCatalog>,
    pub backend: Arc<dyn RenderBackend>,
    pub materializer: Arc<OutputMaterializer>,
    pub paths: PathsConfig,
}

impl Pipeline {
    /// Run the whole pipeline for `request`
    ///
    /// The job's scratch directory is removed once the run ends, whatever
    /// the outcome. Harvested artifacts live outside it.
    pub async fn run(&self, job_id: Uuid, request: &GenerationRequest) -> Result<JobOutput, PipelineError> {
        let result = self.run_stages(job_id, request).await;
        self.remove_scratch(job_id).await;
        result
    }

    async fn remove_scratch(&self, job_id: Uuid) {
        let dir = scratch_dir(&self.paths.work_dir, job_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => debug!(job_id = %job_id, dir = %dir.display(), "Removed scratch directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(job_id = %job_id, dir = %dir.display(), error = %e, "Could not remove scratch directory"),
        }
    }

    async fn run_stages(&self, job_id: Uuid, request: &GenerationRequest) -> Result<JobOutput, PipelineError> {
        let key = TemplateKey::new(request.input_type, request.person_count);
        info!(
            job_id = %job_id,
            input_type = ?request.input_type,
            person_count = ?request.person_count,
            "Pipeline started"
        );

        let media_path = self.resolve_media(job_id, request).await?;
        let audio = self.resolve_audio(job_id, request).await?;

        let measurements = self.measure(&audio, request).await;
        let timing = parameter_deriver::derive(request, &measurements);
        info!(
            job_id = %job_id,
            fps = timing.fps,
            max_frame = timing.max_frame,
            motion_frame = timing.motion_frame,
            source = ?timing.frame_source,
            "Derived timing"
        );
        if let Some(shortfall) = timing.audio_shortfall {
            warn!(
                job_id = %job_id,
                audio_seconds = shortfall.audio_seconds,
                requested_seconds = shortfall.requested_seconds,
                "Audio is shorter than the requested video; the tail may be static"
            );
        }

        let mut graph = self.templates.instantiate(key).await?;
        let params = TemplateParams {
            media_path,
            audio_path: audio.primary,
            secondary_audio_path: audio.secondary,
            prompt: request.prompt.clone(),
            width: request.width,
            height: request.height,
            timing,
            audio_provided: audio.provided,
            trim_to_audio: request.trim_to_audio,
        };
        let report = graph_template::apply(&mut graph, key, &params);
        debug!(
            job_id = %job_id,
            written = report.written.len(),
            skipped = report.skipped.len(),
            "Parameterized workflow"
        );

        let outputs = self.backend.execute(job_id, &graph).await?;
        let artifact = harvest(&outputs).await?;

        if request.network_volume {
            let persisted = self.materializer.persist(job_id, &artifact).await?;
            return Ok(JobOutput {
                artifact: Artifact::Path(persisted),
                persisted: true,
            });
        }
        Ok(JobOutput {
            artifact,
            persisted: false,
        })
    }

    fn example_reference(&self, file_name: &str) -> MediaReference {
        MediaReference {
            kind: ReferenceKind::Path,
            value: self.paths.examples_dir.join(file_name).to_string_lossy().into_owned(),
        }
    }

    async fn resolve_media(&self, job_id: Uuid, request: &GenerationRequest) -> Result<PathBuf, PipelineError> {
        let (default_filename, example) = match request.input_type {
            InputType::Image => ("input_image.jpg", EXAMPLE_IMAGE),
            InputType::Video => ("input_video.mp4", EXAMPLE_VIDEO),
        };
        let reference = match request.media_reference() {
            Some(reference) => reference,
            None => {
                info!(job_id = %job_id, example, "No media supplied, using example asset");
                self.example_reference(example)
            }
        };
        Ok(self.resolver.resolve(&reference, job_id, default_filename).await?)
    }

    async fn resolve_audio(&self, job_id: Uuid, request: &GenerationRequest) -> Result<ResolvedAudio, PipelineError> {
        let (primary, provided) = match request.audio_reference() {
            Some(reference) => (self.resolver.resolve(&reference, job_id, "input_audio.wav").await?, true),
            None => (self.fallback_audio(job_id, request).await?, false),
        };

        let secondary = if request.is_multi_person() {
            match request.secondary_audio_reference() {
                Some(reference) => Some(self.resolver.resolve(&reference, job_id, "input_audio_2.wav").await?),
                None => Some(primary.clone()),
            }
        } else {
            None
        };

        Ok(ResolvedAudio {
            primary,
            secondary,
            provided,
        })
    }

    /// Silent track for the requested duration, else the example audio
    async fn fallback_audio(&self, job_id: Uuid, request: &GenerationRequest) -> Result<PathBuf, PipelineError> {
        let example = self.example_reference(EXAMPLE_AUDIO);
        let Some(seconds) = request.requested_duration() else {
            return Ok(self.resolver.resolve(&example, job_id, EXAMPLE_AUDIO).await?);
        };

        let target = scratch_dir(&self.paths.work_dir, job_id).join("silent_audio.wav");
        match self.audio.generate_silence(seconds, &target).await {
            Ok(path) => {
                info!(job_id = %job_id, seconds, "No audio supplied, generated silent track");
                Ok(path)
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Silent track generation failed, using example audio");
                match self.resolver.resolve(&example, job_id, EXAMPLE_AUDIO).await {
                    Ok(path) => Ok(path),
                    Err(_) => Err(e.into()),
                }
            }
        }
    }

    async fn measure(&self, audio: &ResolvedAudio, request: &GenerationRequest) -> AudioMeasurements {
        let primary_seconds = self.audio.duration_seconds(&audio.primary).await;
        let secondary_seconds = match &audio.secondary {
            Some(path) if request.is_multi_person() => self.audio.duration_seconds(path).await,
            _ => None,
        };
        AudioMeasurements {
            provided: audio.provided,
            primary_seconds,
            secondary_seconds,
        }
    }
}

/// Pick the produced artifact, which must exist on disk
async fn harvest(outputs: &[NodeArtifacts]) -> Result<Artifact, PipelineError> {
    let Some((node_id, path)) = first_artifact(outputs) else {
        return Err(PipelineError::NoOutputProduced);
    };
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        warn!(node_id, path = %path.display(), "Reported artifact is missing on disk");
        return Err(PipelineError::NoOutputProduced);
    }
    debug!(node_id, path = %path.display(), "Harvested artifact");
    Ok(Artifact::Path(path.clone()))
}

/// Owns job submission, execution, and status lookup
#[derive(Clone)]
pub struct JobExecutor {
    store: Arc<dyn JobStore>,
    pipeline: Arc<Pipeline>,
}

impl JobExecutor {
    pub fn new(store: Arc<dyn JobStore>, pipeline: Arc<Pipeline>) -> Self {
        Self { store, pipeline }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Accept a request and run it in the background
    ///
    /// Returns as soon as the job is recorded.
    pub async fn submit(&self, request: GenerationRequest) -> Uuid {
        let job = Job::new(request.clone());
        let job_id = job.id;
        self.store.insert(job).await;
        info!(job_id = %job_id, "Job queued");

        let executor = self.clone();
        tokio::spawn(async move {
            executor.execute(job_id, request).await;
        });
        job_id
    }

    async fn execute(&self, job_id: Uuid, request: GenerationRequest) {
        if let Err(e) = self.store.update(job_id, JobUpdate::Start).await {
            warn!(job_id = %job_id, error = %e, "Job could not start");
            return;
        }

        let update = match self.pipeline.run(job_id, &request).await {
            Ok(output) => JobUpdate::Complete(output),
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Job failed");
                JobUpdate::Fail(e.to_string())
            }
        };

        match self.store.update(job_id, update).await {
            Ok((transition, _)) => info!(
                job_id = %job_id,
                status = ?transition.new_status,
                "Job finished"
            ),
            Err(e) => warn!(job_id = %job_id, error = %e, "Job result discarded"),
        }
    }

    /// Run a request inline without recording it
    pub async fn run_sync(&self, request: &GenerationRequest) -> Result<JobOutput, PipelineError> {
        let job_id = itk_common::uuid_utils::generate();
        info!(job_id = %job_id, "Synchronous run");
        self.pipeline.run(job_id, request).await
    }

    /// Snapshot of a job record
    pub async fn get_status(&self, job_id: Uuid) -> Option<Job> {
        self.store.get(job_id).await
    }

    /// Periodically evict expired terminal jobs
    pub fn spawn_retention_sweeper(&self, config: JobsConfig) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.sweep_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let evicted = store
                    .purge_expired(config.retention(), itk_common::time::now())
                    .await;
                if evicted > 0 {
                    info!(evicted, "Evicted expired jobs");
                }
            }
        })
    }
}
