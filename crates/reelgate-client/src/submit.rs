//! Task submission.

use std::sync::Arc;

use metrics::counter;
use tracing::{info, warn};

use crate::backend::{JobBackend, Submission};
use crate::error::SubmissionError;

pub const SUBMISSIONS_TOTAL: &str = "reelgate_submissions_total";

/// Issues exactly one job-start call per request. Never retries: every
/// retry would be a new job and, behind the gate, a new unit of quota.
#[derive(Clone)]
pub struct TaskSubmitter {
    backend: Arc<dyn JobBackend>,
}

impl TaskSubmitter {
    pub fn new(backend: Arc<dyn JobBackend>) -> Self {
        Self { backend }
    }

    pub async fn submit(&self, source_reference: &str) -> Result<Submission, SubmissionError> {
        let source_reference = source_reference.trim();
        if source_reference.is_empty() {
            return Err(SubmissionError::Rejected {
                status: 400,
                detail: "source reference cannot be empty".to_string(),
            });
        }

        match self.backend.submit(source_reference).await {
            Ok(submission) => {
                counter!(SUBMISSIONS_TOTAL, "outcome" => "accepted").increment(1);
                info!(task_id = %submission.task_id, "Job submitted");
                Ok(submission)
            }
            Err(e) => {
                let err = SubmissionError::from(e);
                counter!(SUBMISSIONS_TOTAL, "outcome" => err.kind()).increment(1);
                warn!(error = %err, "Job submission failed");
                Err(err)
            }
        }
    }
}
