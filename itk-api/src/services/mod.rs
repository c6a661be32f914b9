//! Job orchestration services
//!
//! Bottom-up: timing derivation, media resolution, audio capabilities,
//! template parameterization, backend session, job storage, execution, and
//! output materialization.

pub mod audio_tools;
pub mod comfy_client;
pub mod graph_template;
pub mod job_executor;
pub mod job_store;
pub mod media_resolver;
pub mod output_materializer;
pub mod parameter_deriver;

pub use audio_tools::{AudioError, AudioTools, LocalAudioTools};
pub use comfy_client::{BackendError, ComfyClient, NodeArtifacts, RenderBackend};
pub use graph_template::{Graph, TemplateCatalog, TemplateError, TemplateKey};
pub use job_executor::{JobExecutor, Pipeline, PipelineError};
pub use job_store::{InMemoryJobStore, JobStore};
pub use media_resolver::{LocalMediaResolver, MediaResolver, ResolutionError};
pub use output_materializer::{MaterializationError, Materialized, OutputMaterializer, Representation};
pub use parameter_deriver::{AudioMeasurements, DerivedTiming};
