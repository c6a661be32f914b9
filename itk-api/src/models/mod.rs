//! Data models for the orchestration service
//!
//! - Generation request parameters as submitted by callers
//! - Job lifecycle record and its state machine

pub mod job;
pub mod request;

pub use job::{Artifact, Job, JobOutput, JobStatus, JobUpdate, StatusTransition, TransitionError};
pub use request::{
    GenerationRequest, InputType, MediaReference, PersonCount, ReferenceKind, DEFAULT_PROMPT,
};
