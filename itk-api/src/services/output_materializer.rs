//! Output Materializer
//!
//! Converts a job's artifact into the representation a caller asked for, and
//! copies artifacts to the network volume for requests that want them
//! persisted.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Artifact, JobOutput};
use crate::services::media_resolver::decode_base64_payload;

/// MIME type assumed when the extension says nothing
pub const DEFAULT_VIDEO_MIME: &str = "video/mp4";

/// Caller-selected output representation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Representation {
    /// Streamed file body
    #[default]
    File,
    /// Inline base64 string
    Base64,
    /// Filesystem path reference
    Path,
}

/// Artifact ready to hand to a caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Materialized {
    PathReference(PathBuf),
    Base64(String),
    File {
        path: PathBuf,
        mime: String,
        filename: String,
        /// Written only for this response; removed once opened for streaming
        temporary: bool,
    },
}

#[derive(Debug, Error)]
pub enum MaterializationError {
    #[error("Artifact not found: {0}")]
    NotFound(PathBuf),

    #[error("Inline artifact is not valid base64: {0}")]
    InvalidInline(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// File name of a persisted artifact
pub fn persisted_file_name(job_id: Uuid) -> String {
    format!("infinitetalk_{}.mp4", job_id)
}

pub struct OutputMaterializer {
    network_volume_dir: PathBuf,
}

impl OutputMaterializer {
    pub fn new(network_volume_dir: PathBuf) -> Self {
        Self { network_volume_dir }
    }

    pub fn persisted_path(&self, job_id: Uuid) -> PathBuf {
        self.network_volume_dir.join(persisted_file_name(job_id))
    }

    /// Copy (or decode) `artifact` onto the network volume
    pub async fn persist(&self, job_id: Uuid, artifact: &Artifact) -> Result<PathBuf, MaterializationError> {
        tokio::fs::create_dir_all(&self.network_volume_dir).await?;
        let target = self.persisted_path(job_id);

        match artifact {
            Artifact::Path(source) => {
                ensure_exists(source).await?;
                tokio::fs::copy(source, &target).await?;
            }
            Artifact::Inline(payload) => {
                tokio::fs::write(&target, decode_inline(payload)?).await?;
            }
        }

        tracing::info!(job_id = %job_id, target = %target.display(), "Persisted artifact to network volume");
        Ok(target)
    }

    /// Produce the requested representation of a job output
    pub async fn materialize(
        &self,
        output: &JobOutput,
        representation: Representation,
    ) -> Result<Materialized, MaterializationError> {
        if output.persisted {
            let path = output
                .artifact
                .path()
                .ok_or_else(|| MaterializationError::NotFound(self.network_volume_dir.clone()))?;
            return Ok(Materialized::PathReference(path.clone()));
        }

        match (&output.artifact, representation) {
            (Artifact::Path(path), Representation::Path) => {
                ensure_exists(path).await?;
                Ok(Materialized::PathReference(path.clone()))
            }
            (Artifact::Path(path), Representation::Base64) => {
                ensure_exists(path).await?;
                let bytes = tokio::fs::read(path).await?;
                Ok(Materialized::Base64(STANDARD.encode(bytes)))
            }
            (Artifact::Path(path), Representation::File) => {
                ensure_exists(path).await?;
                Ok(file_descriptor(path.clone(), false))
            }
            (Artifact::Inline(payload), Representation::Base64) => Ok(Materialized::Base64(payload.clone())),
            // No path exists for inline bytes; serve them as a file instead
            (Artifact::Inline(payload), Representation::File | Representation::Path) => {
                let bytes = decode_inline(payload)?;
                let path = tempfile::Builder::new()
                    .prefix("infinitetalk_")
                    .suffix(".mp4")
                    .tempfile()?
                    .into_temp_path()
                    .keep()
                    .map_err(|e| e.error)?;
                tokio::fs::write(&path, bytes).await?;
                Ok(file_descriptor(path, true))
            }
        }
    }
}

fn decode_inline(payload: &str) -> Result<Vec<u8>, MaterializationError> {
    decode_base64_payload(payload).map_err(|e| MaterializationError::InvalidInline(e.to_string()))
}

async fn ensure_exists(path: &Path) -> Result<(), MaterializationError> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        Ok(())
    } else {
        Err(MaterializationError::NotFound(path.to_path_buf()))
    }
}

fn file_descriptor(path: PathBuf, temporary: bool) -> Materialized {
    let mime = mime_guess::from_path(&path)
        .first_raw()
        .unwrap_or(DEFAULT_VIDEO_MIME)
        .to_string();
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output.mp4".to_string());
    Materialized::File {
        path,
        mime,
        filename,
        temporary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn on_disk(path: PathBuf) -> JobOutput {
        JobOutput {
            artifact: Artifact::Path(path),
            persisted: false,
        }
    }

    fn inline(payload: &str) -> JobOutput {
        JobOutput {
            artifact: Artifact::Inline(payload.to_string()),
            persisted: false,
        }
    }

    #[tokio::test]
    async fn test_path_artifact_in_each_representation() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("render_00001.mp4");
        std::fs::write(&video, b"hello").unwrap();
        let materializer = OutputMaterializer::new(dir.path().join("volume"));
        let output = on_disk(video.clone());

        assert_eq!(
            materializer.materialize(&output, Representation::Path).await.unwrap(),
            Materialized::PathReference(video.clone())
        );
        assert_eq!(
            materializer.materialize(&output, Representation::Base64).await.unwrap(),
            Materialized::Base64("aGVsbG8=".to_string())
        );
        assert_eq!(
            materializer.materialize(&output, Representation::File).await.unwrap(),
            Materialized::File {
                path: video,
                mime: "video/mp4".to_string(),
                filename: "render_00001.mp4".to_string(),
                temporary: false,
            }
        );
    }

    #[tokio::test]
    async fn test_inline_artifact_requested_as_file_gets_temp_file() {
        let materializer = OutputMaterializer::new(PathBuf::from("/unused"));

        let result = materializer.materialize(&inline("aGVsbG8="), Representation::Path).await.unwrap();
        let (path, mime) = match result {
            Materialized::File {
                path,
                mime,
                temporary: true,
                ..
            } => (path, mime),
            other => panic!("expected file fallback, got {:?}", other),
        };
        assert_eq!(mime, DEFAULT_VIDEO_MIME);
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
        std::fs::remove_file(path).unwrap();

        assert_eq!(
            materializer.materialize(&inline("aGVsbG8="), Representation::Base64).await.unwrap(),
            Materialized::Base64("aGVsbG8=".to_string())
        );
    }

    #[tokio::test]
    async fn test_missing_artifact_is_not_found() {
        let materializer = OutputMaterializer::new(PathBuf::from("/unused"));
        let output = on_disk(PathBuf::from("/no/such/render.mp4"));

        for representation in [Representation::File, Representation::Base64, Representation::Path] {
            assert!(matches!(
                materializer.materialize(&output, representation).await,
                Err(MaterializationError::NotFound(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_persisted_output_is_always_a_path_reference() {
        let dir = tempfile::tempdir().unwrap();
        let materializer = OutputMaterializer::new(dir.path().to_path_buf());
        let job_id = Uuid::new_v4();
        let output = JobOutput {
            artifact: Artifact::Path(materializer.persisted_path(job_id)),
            persisted: true,
        };

        for representation in [Representation::File, Representation::Base64, Representation::Path] {
            assert_eq!(
                materializer.materialize(&output, representation).await.unwrap(),
                Materialized::PathReference(dir.path().join(persisted_file_name(job_id)))
            );
        }
    }

    #[tokio::test]
    async fn test_persist_copies_and_decodes() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("render.mp4");
        std::fs::write(&source, b"frames").unwrap();
        let materializer = OutputMaterializer::new(dir.path().join("volume"));

        let job_id = Uuid::new_v4();
        let target = materializer.persist(job_id, &Artifact::Path(source)).await.unwrap();
        assert!(target.ends_with(format!("infinitetalk_{}.mp4", job_id)));
        assert_eq!(std::fs::read(&target).unwrap(), b"frames");

        let other = Uuid::new_v4();
        let target = materializer
            .persist(other, &Artifact::Inline("aGVsbG8=".into()))
            .await
            .unwrap();
        assert_eq!(std::fs::read(target).unwrap(), b"hello");

        assert!(matches!(
            materializer
                .persist(Uuid::new_v4(), &Artifact::Path(dir.path().join("gone.mp4")))
                .await,
            Err(MaterializationError::NotFound(_))
        ));
    }

    #[test]
    fn test_representation_parses_lowercase() {
        let parsed: Representation = serde_json::from_str("\"base64\"").unwrap();
        assert_eq!(parsed, Representation::Base64);
        assert_eq!(Representation::default(), Representation::File);
    }
}
