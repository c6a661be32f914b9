//! Synchronous generation endpoint

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    response::Response,
    routing::post,
    Json, Router,
};

use super::{artifact_response, parse_body, parse_output, OutputQuery, RequestEnvelope};
use crate::error::ApiResult;
use crate::AppState;

/// POST /infer?output=file|base64|path
///
/// Runs the pipeline inline and answers with the artifact. Requests with
/// `network_volume` always get a path reference.
pub async fn infer(
    State(state): State<AppState>,
    query: Result<Query<OutputQuery>, QueryRejection>,
    body: Result<Json<RequestEnvelope>, JsonRejection>,
) -> ApiResult<Response> {
    let representation = parse_output(query)?;
    let request = parse_body(body)?;

    let output = state.executor.run_sync(&request).await?;
    let materialized = state
        .executor
        .pipeline()
        .materializer
        .materialize(&output, representation)
        .await?;
    artifact_response(materialized).await
}

pub fn infer_routes() -> Router<AppState> {
    Router::new().route("/infer", post(infer))
}
