//! Job backend contract.

use async_trait::async_trait;
use reelgate_models::{AdmissionDecision, TaskId, TaskRecord};

use crate::error::BackendResult;

/// Result of a successful job-start call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub task_id: TaskId,
    /// Quota metadata, when the call went through an admission gate
    pub admission: Option<AdmissionDecision>,
}

impl Submission {
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            admission: None,
        }
    }
}

/// The service that owns and runs jobs.
///
/// Task state lives entirely behind this trait; callers only ever see
/// snapshots.
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Start a job for a source reference and return its task ID.
    async fn submit(&self, source_reference: &str) -> BackendResult<Submission>;

    /// Fetch the current snapshot of a task.
    async fn get_status(&self, task_id: &TaskId) -> BackendResult<TaskRecord>;
}
