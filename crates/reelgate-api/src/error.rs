//! API error types.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use reelgate_client::{BackendError, SubmissionError};
use reelgate_models::AdmissionDecision;
use serde::Serialize;
use thiserror::Error;

use crate::config::running_in_production;
use crate::gate::attach_admission_headers;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authentication required")]
    Unauthenticated,

    #[error("Rate limit exceeded")]
    QuotaExceeded(AdmissionDecision),

    #[error("Too many requests")]
    Throttled,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Job rejected by backend: {0}")]
    SubmissionRejected(String),

    #[error("Job backend unavailable: {0}")]
    BackendUnreachable(String),

    #[error("Job submission unconfirmed: {0}")]
    SubmissionUnconfirmed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::QuotaExceeded(_) | ApiError::Throttled => StatusCode::TOO_MANY_REQUESTS,
            ApiError::BadRequest(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::SubmissionRejected(_)
            | ApiError::BackendUnreachable(_)
            | ApiError::SubmissionUnconfirmed(_)
            | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthenticated => "unauthenticated",
            ApiError::QuotaExceeded(_) => "quota_exceeded",
            ApiError::Throttled => "too_many_requests",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Validation(_) => "validation_error",
            ApiError::NotFound(_) => "not_found",
            ApiError::SubmissionRejected(_) => "submission_rejected",
            ApiError::BackendUnreachable(_) => "backend_unreachable",
            ApiError::SubmissionUnconfirmed(_) => "submission_unconfirmed",
            ApiError::Internal(_) => "internal_error",
        }
    }

    /// Detail shown to the caller. Backend details are hidden in production.
    fn public_detail(&self, production: bool) -> String {
        match self {
            ApiError::Internal(_)
            | ApiError::BackendUnreachable(_)
            | ApiError::SubmissionUnconfirmed(_)
                if production =>
            {
                "An internal error occurred".to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl From<SubmissionError> for ApiError {
    fn from(err: SubmissionError) -> Self {
        match err {
            SubmissionError::Unauthenticated => ApiError::Unauthenticated,
            SubmissionError::AdmissionDenied(decision) => ApiError::QuotaExceeded(decision),
            SubmissionError::Rejected { detail, .. } => ApiError::SubmissionRejected(detail),
            SubmissionError::Unreachable(detail) => ApiError::BackendUnreachable(detail),
            SubmissionError::Unconfirmed(detail) => ApiError::SubmissionUnconfirmed(detail),
        }
    }
}

impl From<BackendError> for ApiError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::TaskNotFound(id) => ApiError::NotFound(format!("Task {}", id)),
            BackendError::Unauthenticated(_) => ApiError::Unauthenticated,
            BackendError::QuotaExceeded(decision) => ApiError::QuotaExceeded(decision),
            e if e.is_transport() => ApiError::BackendUnreachable(e.to_string()),
            e => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::Validation(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remaining: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reset_at: Option<DateTime<Utc>>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let detail = self.public_detail(running_in_production());

        let quota = match &self {
            ApiError::QuotaExceeded(decision) => Some(decision.clone()),
            _ => None,
        };

        let body = ErrorResponse {
            detail,
            code: self.code(),
            limit: quota.as_ref().map(|d| d.limit),
            remaining: quota.as_ref().map(|d| d.remaining),
            reset_at: quota.as_ref().map(|d| d.reset_at),
        };

        let mut response = (status, Json(body)).into_response();
        match (&self, quota) {
            (ApiError::QuotaExceeded(_), Some(decision)) => {
                attach_admission_headers(response.headers_mut(), &decision);
                let retry_after = decision.retry_after_secs(Utc::now());
                response
                    .headers_mut()
                    .insert("Retry-After", HeaderValue::from(retry_after));
            }
            (ApiError::Throttled, _) => {
                response
                    .headers_mut()
                    .insert("Retry-After", HeaderValue::from_static("1"));
            }
            _ => {}
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::Unauthenticated.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::SubmissionRejected("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ApiError::SubmissionRejected("x".into()).code(), "submission_rejected");
        assert_eq!(ApiError::BackendUnreachable("x".into()).code(), "backend_unreachable");
    }

    #[test]
    fn test_quota_exceeded_response_carries_metadata() {
        let reset_at = Utc::now() + chrono::Duration::hours(2);
        let response = ApiError::QuotaExceeded(AdmissionDecision::denied(3, reset_at)).into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = response.headers();
        assert_eq!(headers["X-RateLimit-Limit"], "3");
        assert_eq!(headers["X-RateLimit-Remaining"], "0");
        assert_eq!(
            headers["X-RateLimit-Reset"],
            reset_at.timestamp_millis().to_string().as_str()
        );
        assert!(headers.contains_key("Retry-After"));
    }

    #[test]
    fn test_production_hides_backend_details() {
        let err = ApiError::BackendUnreachable("connect to 10.0.0.5:9000 refused".into());
        assert_eq!(err.public_detail(true), "An internal error occurred");
        assert!(err.public_detail(false).contains("10.0.0.5"));

        let internal = ApiError::Internal("bad payload".into());
        assert_eq!(internal.public_detail(true), "An internal error occurred");

        let rejected = ApiError::SubmissionRejected("unsupported url".into());
        assert!(rejected.public_detail(true).contains("unsupported url"));
    }

    #[test]
    fn test_backend_error_mapping() {
        assert!(matches!(
            ApiError::from(BackendError::TaskNotFound("t".into())),
            ApiError::NotFound(_)
        ));
        assert!(matches!(
            ApiError::from(BackendError::Timeout(500)),
            ApiError::BackendUnreachable(_)
        ));
        assert!(matches!(
            ApiError::from(SubmissionError::Rejected {
                status: 422,
                detail: "bad".into()
            }),
            ApiError::SubmissionRejected(_)
        ));
        let unconfirmed = ApiError::from(SubmissionError::Unconfirmed("eof".into()));
        assert_eq!(unconfirmed.code(), "submission_unconfirmed");
        assert_eq!(unconfirmed.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
