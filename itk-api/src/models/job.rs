//! Job lifecycle state machine
//!
//! QUEUED → IN_PROGRESS → COMPLETED | FAILED
//!
//! Terminal states are written exactly once; any further update is rejected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

use crate::models::GenerationRequest;

/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Accepted, execution task not yet started
    Queued,
    /// Pipeline running
    InProgress,
    /// Artifact produced
    Completed,
    /// Pipeline failed, see `error`
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Produced video, either on disk or inline base64
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Artifact {
    Path(PathBuf),
    Inline(String),
}

impl Artifact {
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Artifact::Path(path) => Some(path),
            Artifact::Inline(_) => None,
        }
    }
}

/// Result of a successful pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutput {
    pub artifact: Artifact,
    /// Artifact was copied to the network volume
    pub persisted: bool,
}

/// Requested change to a job record
#[derive(Debug, Clone)]
pub enum JobUpdate {
    Start,
    Complete(JobOutput),
    Fail(String),
}

/// Rejected state change
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Job {id} is already terminal ({status:?})")]
    AlreadyTerminal { id: Uuid, status: JobStatus },

    #[error("Job {id} cannot start from {status:?}")]
    InvalidStart { id: Uuid, status: JobStatus },
}

/// Applied state change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusTransition {
    pub job_id: Uuid,
    pub old_status: JobStatus,
    pub new_status: JobStatus,
    pub transitioned_at: DateTime<Utc>,
}

/// Job record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub input: GenerationRequest,
    pub output: Option<JobOutput>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a queued job with a fresh id
    pub fn new(input: GenerationRequest) -> Self {
        Self::with_id(itk_common::uuid_utils::generate(), input)
    }

    pub fn with_id(id: Uuid, input: GenerationRequest) -> Self {
        let now = itk_common::time::now();
        Self {
            id,
            status: JobStatus::Queued,
            input,
            output: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply an update, enforcing the state machine
    pub fn apply(&mut self, update: JobUpdate) -> Result<StatusTransition, TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError::AlreadyTerminal {
                id: self.id,
                status: self.status,
            });
        }

        let old_status = self.status;
        let new_status = match update {
            JobUpdate::Start => {
                if self.status != JobStatus::Queued {
                    return Err(TransitionError::InvalidStart {
                        id: self.id,
                        status: self.status,
                    });
                }
                JobStatus::InProgress
            }
            JobUpdate::Complete(output) => {
                self.output = Some(output);
                JobStatus::Completed
            }
            JobUpdate::Fail(error) => {
                self.error = Some(error);
                JobStatus::Failed
            }
        };

        let now = itk_common::time::now();
        self.status = new_status;
        self.updated_at = now;

        Ok(StatusTransition {
            job_id: self.id,
            old_status,
            new_status,
            transitioned_at: now,
        })
    }
}
