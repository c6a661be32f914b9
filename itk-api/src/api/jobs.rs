//! Background job endpoints
//!
//! Submit with `/run`, poll `/status/:id`, fetch the result from
//! `/download/:id` once the job is `COMPLETED`.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    response::Response,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;

use super::{artifact_response, parse_body, parse_output, OutputQuery, RequestEnvelope};
use crate::error::{ApiError, ApiResult};
use crate::models::{Artifact, Job, JobOutput, JobStatus};
use crate::AppState;

/// Response to a submission
#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub id: Uuid,
    pub status: JobStatus,
}

/// Artifact summary in status responses (never the inline body)
#[derive(Debug, Serialize)]
pub struct OutputSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_path: Option<PathBuf>,
    pub inline: bool,
    pub persisted: bool,
}

impl From<&JobOutput> for OutputSummary {
    fn from(output: &JobOutput) -> Self {
        Self {
            video_path: output.artifact.path().cloned(),
            inline: matches!(output.artifact, Artifact::Inline(_)),
            persisted: output.persisted,
        }
    }
}

/// Job status snapshot
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub id: Uuid,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for StatusResponse {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            status: job.status,
            output: job.output.as_ref().map(OutputSummary::from),
            error: job.error,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

async fn find_job(state: &AppState, id: &str) -> ApiResult<Job> {
    let not_found = || ApiError::NotFound(format!("job {}", id));
    let job_id = itk_common::uuid_utils::parse(id).map_err(|_| not_found())?;
    state.executor.get_status(job_id).await.ok_or_else(not_found)
}

/// POST /run
pub async fn run(
    State(state): State<AppState>,
    body: Result<Json<RequestEnvelope>, JsonRejection>,
) -> ApiResult<Json<RunResponse>> {
    let request = parse_body(body)?;
    let id = state.executor.submit(request).await;
    Ok(Json(RunResponse {
        id,
        status: JobStatus::Queued,
    }))
}

/// GET /status/:id
pub async fn status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    let job = find_job(&state, &id).await?;
    Ok(Json(job.into()))
}

/// GET /download/:id?output=file|base64|path
pub async fn download(
    State(state): State<AppState>,
    Path(id): Path<String>,
    query: Result<Query<OutputQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let representation = parse_output(query)?;
    let job = find_job(&state, &id).await?;

    let output = match (job.status, job.output) {
        (JobStatus::Completed, Some(output)) => output,
        (status, _) => {
            return Err(ApiError::NotFound(format!(
                "job {} has no artifact (status {:?})",
                job.id, status
            )))
        }
    };

    let materialized = state
        .executor
        .pipeline()
        .materializer
        .materialize(&output, representation)
        .await?;
    artifact_response(materialized).await
}

pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/run", post(run))
        .route("/status/:id", get(status))
        .route("/download/:id", get(download))
}
