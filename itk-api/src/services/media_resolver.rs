//! Media reference materialization
//!
//! Turns a request's media reference (local path, remote URL, or inline
//! base64) into a local file the backend can read. Downloads and decoded
//! payloads land in the job's scratch directory.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{MediaReference, ReferenceKind};

/// Media resolution errors (fatal for the job, never retried)
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("Local media not found: {0}")]
    NotFound(String),

    #[error("Invalid media URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Download of {url} failed: {reason}")]
    Download { url: String, reason: String },

    #[error("Invalid base64 payload: {0}")]
    InvalidBase64(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Materializes media references to local files
#[async_trait]
pub trait MediaResolver: Send + Sync {
    /// Resolve `reference` for `job_id`, naming created files `default_filename`
    async fn resolve(
        &self,
        reference: &MediaReference,
        job_id: Uuid,
        default_filename: &str,
    ) -> Result<PathBuf, ResolutionError>;
}

/// Scratch directory owned by one job
pub fn scratch_dir(work_dir: &Path, job_id: Uuid) -> PathBuf {
    work_dir.join(format!("task_{}", job_id))
}

/// Resolver backed by the local filesystem and an HTTP client
pub struct LocalMediaResolver {
    work_dir: PathBuf,
    http_client: reqwest::Client,
}

impl LocalMediaResolver {
    pub fn new(work_dir: PathBuf) -> Result<Self, ResolutionError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| ResolutionError::Download {
                url: String::new(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            work_dir,
            http_client,
        })
    }

    async fn target_path(&self, job_id: Uuid, filename: &str) -> Result<PathBuf, ResolutionError> {
        let dir = scratch_dir(&self.work_dir, job_id);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir.join(filename))
    }

    async fn download(&self, url: &str, target: &Path) -> Result<(), ResolutionError> {
        let parsed = reqwest::Url::parse(url).map_err(|e| ResolutionError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ResolutionError::InvalidUrl {
                url: url.to_string(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }

        let download_error = |reason: String| ResolutionError::Download {
            url: url.to_string(),
            reason,
        };

        let response = self
            .http_client
            .get(parsed)
            .send()
            .await
            .map_err(|e| download_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(download_error(format!("HTTP {}", status.as_u16())));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| download_error(e.to_string()))?;
        tokio::fs::write(target, &bytes).await?;

        tracing::debug!(url = %url, bytes = bytes.len(), target = %target.display(), "Downloaded media");
        Ok(())
    }
}

#[async_trait]
impl MediaResolver for LocalMediaResolver {
    async fn resolve(
        &self,
        reference: &MediaReference,
        job_id: Uuid,
        default_filename: &str,
    ) -> Result<PathBuf, ResolutionError> {
        match reference.kind {
            ReferenceKind::Path => {
                let path = PathBuf::from(&reference.value);
                if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    return Err(ResolutionError::NotFound(reference.value.clone()));
                }
                Ok(path)
            }
            ReferenceKind::Url => {
                let target = self.target_path(job_id, default_filename).await?;
                self.download(&reference.value, &target).await?;
                Ok(target)
            }
            ReferenceKind::Base64 => {
                let bytes = decode_base64_payload(&reference.value)?;
                let target = self.target_path(job_id, default_filename).await?;
                tokio::fs::write(&target, &bytes).await?;
                tracing::debug!(job_id = %job_id, bytes = bytes.len(), target = %target.display(), "Decoded inline media");
                Ok(target)
            }
        }
    }
}

/// Decode a base64 payload, accepting an optional `data:<mime>;base64,` prefix
pub fn decode_base64_payload(payload: &str) -> Result<Vec<u8>, ResolutionError> {
    let body = match payload.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => payload,
    };
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.is_empty() {
        return Err(ResolutionError::InvalidBase64("empty payload".to_string()));
    }
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| ResolutionError::InvalidBase64(e.to_string()))
}
