//! Job Store
//!
//! Owns every job record. Mutations go through [`JobStore::update`], which
//! applies one state transition under the exclusive lock; reads return
//! snapshots.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{Job, JobUpdate, StatusTransition, TransitionError};

/// Storage seam for job records
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new record
    async fn insert(&self, job: Job);

    /// Snapshot of one record
    async fn get(&self, id: Uuid) -> Option<Job>;

    /// Apply one transition, returning it with the updated snapshot
    async fn update(
        &self,
        id: Uuid,
        update: JobUpdate,
    ) -> Result<(StatusTransition, Job), TransitionError>;

    /// Evict terminal records last updated more than `retention` before `now`
    ///
    /// Returns the number of evicted records.
    async fn purge_expired(&self, retention: Duration, now: DateTime<Utc>) -> usize;

    /// Number of stored records
    async fn len(&self) -> usize;
}

/// In-memory store (lost on restart)
#[derive(Clone, Default)]
pub struct InMemoryJobStore {
    jobs: Arc<RwLock<HashMap<Uuid, Job>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: Job) {
        self.jobs.write().await.insert(job.id, job);
    }

    async fn get(&self, id: Uuid) -> Option<Job> {
        self.jobs.read().await.get(&id).cloned()
    }

    async fn update(
        &self,
        id: Uuid,
        update: JobUpdate,
    ) -> Result<(StatusTransition, Job), TransitionError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(TransitionError::NotFound(id))?;
        let transition = job.apply(update)?;
        Ok((transition, job.clone()))
    }

    async fn purge_expired(&self, retention: Duration, now: DateTime<Utc>) -> usize {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| {
            !job.is_terminal() || itk_common::time::age(job.updated_at, now) <= retention
        });
        before - jobs.len()
    }

    async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }
}
