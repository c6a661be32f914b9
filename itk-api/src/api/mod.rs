//! HTTP API handlers
//!
//! - `GET /health`
//! - `POST /infer` synchronous generation
//! - `POST /run`, `GET /status/:id`, `GET /download/:id` background jobs

pub mod health;
pub mod infer;
pub mod jobs;

pub use health::health_routes;
pub use infer::infer_routes;
pub use jobs::job_routes;

use axum::{
    body::Body,
    extract::rejection::{JsonRejection, QueryRejection},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::{de, Deserialize, Deserializer};
use serde_json::{json, Value};
use tokio_util::io::ReaderStream;

use crate::error::{ApiError, ApiResult};
use crate::models::GenerationRequest;
use crate::services::{Materialized, Representation};

/// Request body, bare or wrapped as `{"input": {...}}`
#[derive(Debug)]
pub enum RequestEnvelope {
    Wrapped { input: GenerationRequest },
    Bare(GenerationRequest),
}

impl<'de> Deserialize<'de> for RequestEnvelope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut body = Value::deserialize(deserializer)?;
        // A present `input` key always means the wrapped form
        match body.get_mut("input").map(Value::take) {
            Some(input) => GenerationRequest::deserialize(input)
                .map(|input| RequestEnvelope::Wrapped { input })
                .map_err(de::Error::custom),
            None => GenerationRequest::deserialize(body)
                .map(RequestEnvelope::Bare)
                .map_err(de::Error::custom),
        }
    }
}

impl RequestEnvelope {
    pub fn into_request(self) -> GenerationRequest {
        match self {
            RequestEnvelope::Wrapped { input } => input,
            RequestEnvelope::Bare(request) => request,
        }
    }
}

/// `?output=file|base64|path`
#[derive(Debug, Default, Deserialize)]
pub struct OutputQuery {
    #[serde(default)]
    pub output: Representation,
}

pub(crate) fn parse_body(
    body: Result<Json<RequestEnvelope>, JsonRejection>,
) -> ApiResult<GenerationRequest> {
    body.map(|Json(envelope)| envelope.into_request())
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

pub(crate) fn parse_output(
    query: Result<axum::extract::Query<OutputQuery>, QueryRejection>,
) -> ApiResult<Representation> {
    query
        .map(|axum::extract::Query(query)| query.output)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

/// Turn a materialized artifact into a response
pub(crate) async fn artifact_response(materialized: Materialized) -> ApiResult<Response> {
    match materialized {
        Materialized::PathReference(path) => {
            Ok(Json(json!({ "video_path": path.to_string_lossy() })).into_response())
        }
        Materialized::Base64(video) => Ok(Json(json!({ "video": video })).into_response()),
        Materialized::File {
            path,
            mime,
            filename,
            temporary,
        } => {
            let file = match tokio::fs::File::open(&path).await {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(ApiError::NotFound(format!(
                        "artifact {} is not available",
                        path.display()
                    )))
                }
                Err(e) => return Err(e.into()),
            };
            // The open handle keeps the bytes readable after unlinking
            if temporary {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    tracing::warn!(path = %path.display(), error = %e, "Could not remove temporary artifact");
                }
            }
            let body = Body::from_stream(ReaderStream::new(file));
            let headers = [
                (header::CONTENT_TYPE, mime),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", filename),
                ),
            ];
            Ok((headers, body).into_response())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InputType;

    #[test]
    fn test_envelope_accepts_wrapped_and_bare() {
        let wrapped: RequestEnvelope =
            serde_json::from_str(r#"{"input": {"input_type": "video", "width": 640}}"#).unwrap();
        let request = wrapped.into_request();
        assert_eq!(request.input_type, InputType::Video);
        assert_eq!(request.width, 640);

        let bare: RequestEnvelope = serde_json::from_str(r#"{"prompt": "hi"}"#).unwrap();
        assert_eq!(bare.into_request().prompt, "hi");
    }

    #[tokio::test]
    async fn test_temporary_file_is_unlinked_but_still_streamed() {
        use http_body_util::BodyExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("infinitetalk_inline.mp4");
        std::fs::write(&path, b"inline video").unwrap();

        let response = artifact_response(Materialized::File {
            path: path.clone(),
            mime: "video/mp4".to_string(),
            filename: "infinitetalk_inline.mp4".to_string(),
            temporary: true,
        })
        .await
        .unwrap();

        assert!(!path.exists());
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"inline video");
    }

    #[tokio::test]
    async fn test_job_artifact_is_left_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("render.mp4");
        std::fs::write(&path, b"mp4").unwrap();

        artifact_response(Materialized::File {
            path: path.clone(),
            mime: "video/mp4".to_string(),
            filename: "render.mp4".to_string(),
            temporary: false,
        })
        .await
        .unwrap();

        assert!(path.exists());
    }

    #[test]
    fn test_malformed_wrapped_request_is_an_error() {
        let result = serde_json::from_str::<RequestEnvelope>(r#"{"input": {"width": "wide"}}"#);
        assert!(result.is_err());
    }
}
