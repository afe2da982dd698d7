//! Client error types.

use reelgate_models::AdmissionDecision;
use thiserror::Error;

pub type BackendResult<T> = Result<T, BackendError>;

/// Failure of a single backend call.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Backend unreachable: {0}")]
    Unreachable(String),

    #[error("Backend call timed out after {0} ms")]
    Timeout(u64),

    #[error("Backend rejected request ({status}): {detail}")]
    Rejected { status: u16, detail: String },

    #[error("Authentication required: {0}")]
    Unauthenticated(String),

    #[error("Quota exceeded (limit {}, resets at {})", .0.limit, .0.reset_at)]
    QuotaExceeded(AdmissionDecision),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid backend response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl BackendError {
    pub fn unreachable(msg: impl Into<String>) -> Self {
        Self::Unreachable(msg.into())
    }

    pub fn rejected(status: u16, detail: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            detail: detail.into(),
        }
    }

    /// Whether the failure says nothing about the job itself.
    pub fn is_transport(&self) -> bool {
        match self {
            BackendError::Unreachable(_) | BackendError::Timeout(_) => true,
            BackendError::Network(e) => !e.is_decode(),
            _ => false,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            BackendError::Unreachable(_) | BackendError::Network(_) => "unreachable",
            BackendError::Timeout(_) => "timeout",
            BackendError::Rejected { .. } => "rejected",
            BackendError::Unauthenticated(_) => "unauthenticated",
            BackendError::QuotaExceeded(_) => "quota_exceeded",
            BackendError::TaskNotFound(_) => "not_found",
            BackendError::InvalidResponse(_) => "invalid_response",
        }
    }
}

/// Why a job could not be started, as the caller needs to tell it apart.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("Sign in to start a job")]
    Unauthenticated,

    #[error("Job quota exceeded, try again after {}", .0.reset_at)]
    AdmissionDenied(AdmissionDecision),

    #[error("Backend rejected the job ({status}): {detail}")]
    Rejected { status: u16, detail: String },

    #[error("Job backend unreachable: {0}")]
    Unreachable(String),

    /// The backend answered with success but the reply could not be read.
    /// The job may have started.
    #[error("Job backend reply unreadable, job may have started: {0}")]
    Unconfirmed(String),
}

impl SubmissionError {
    pub fn kind(&self) -> &'static str {
        match self {
            SubmissionError::Unauthenticated => "unauthenticated",
            SubmissionError::AdmissionDenied(_) => "admission_denied",
            SubmissionError::Rejected { .. } => "rejected",
            SubmissionError::Unreachable(_) => "unreachable",
            SubmissionError::Unconfirmed(_) => "unconfirmed",
        }
    }
}

impl From<BackendError> for SubmissionError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unauthenticated(_) => SubmissionError::Unauthenticated,
            BackendError::QuotaExceeded(decision) => SubmissionError::AdmissionDenied(decision),
            BackendError::Rejected { status, detail } => SubmissionError::Rejected { status, detail },
            BackendError::InvalidResponse(detail) => SubmissionError::Unconfirmed(detail),
            BackendError::Network(e) if e.is_decode() => SubmissionError::Unconfirmed(e.to_string()),
            BackendError::TaskNotFound(detail) => SubmissionError::Rejected { status: 404, detail },
            other => SubmissionError::Unreachable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_error_taxonomy() {
        assert!(matches!(
            SubmissionError::from(BackendError::unreachable("connection refused")),
            SubmissionError::Unreachable(_)
        ));
        assert!(matches!(
            SubmissionError::from(BackendError::Timeout(5000)),
            SubmissionError::Unreachable(_)
        ));
        assert!(matches!(
            SubmissionError::from(BackendError::rejected(422, "bad url")),
            SubmissionError::Rejected { status: 422, .. }
        ));
        assert!(matches!(
            SubmissionError::from(BackendError::Unauthenticated("missing token".into())),
            SubmissionError::Unauthenticated
        ));
        assert!(matches!(
            SubmissionError::from(BackendError::InvalidResponse("missing field `task_id`".into())),
            SubmissionError::Unconfirmed(_)
        ));
    }

    #[test]
    fn test_transport_errors() {
        assert!(BackendError::Timeout(10).is_transport());
        assert!(BackendError::unreachable("down").is_transport());
        assert!(!BackendError::rejected(400, "no").is_transport());
    }
}
