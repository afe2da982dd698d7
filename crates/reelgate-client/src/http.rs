//! HTTP job backend client.
//!
//! Speaks two dialects of the same contract: the job backend's own routes,
//! and the reelgate gateway routes that sit in front of it.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reelgate_models::{AdmissionDecision, TaskId, TaskRecord, TaskStatus};
use reqwest::header::HeaderMap;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::{JobBackend, Submission};
use crate::error::{BackendError, BackendResult};

/// Admission metadata headers set by the gateway.
pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
pub const HEADER_RESET: &str = "X-RateLimit-Reset";

/// Status string the job backend returns for unknown task IDs.
const NOT_FOUND_STATUS: &str = "not_found";

/// Route layout of the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireDialect {
    /// `POST /api/py/reddit/reddit-commentary?url=...`,
    /// `GET /api/py/reddit/reddit-commentary/status/{id}`
    JobBackend,
    /// `POST /api/jobs` with a JSON body, `GET /api/jobs/{id}/status`
    Gateway,
}

/// Configuration for the HTTP backend client.
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    /// Base URL of the remote service
    pub base_url: String,
    /// Route layout
    pub dialect: WireDialect,
    /// Bearer token sent on every call
    pub bearer_token: Option<String>,
    /// Per-call timeout
    pub timeout: Duration,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            dialect: WireDialect::JobBackend,
            bearer_token: None,
            timeout: Duration::from_secs(10),
        }
    }
}

impl HttpBackendConfig {
    /// Direct connection to the job backend.
    pub fn job_backend(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Connection through the reelgate gateway.
    pub fn gateway(base_url: impl Into<String>, bearer_token: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            dialect: WireDialect::Gateway,
            bearer_token,
            ..Default::default()
        }
    }

    /// Job backend config from environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("BACKEND_HOST_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            timeout: Duration::from_secs(
                std::env::var("BACKEND_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
            ),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    fn submit_url(&self, source_reference: &str) -> String {
        match self.dialect {
            WireDialect::JobBackend => format!(
                "{}/api/py/reddit/reddit-commentary?url={}",
                self.base(),
                urlencoding::encode(source_reference)
            ),
            WireDialect::Gateway => format!("{}/api/jobs", self.base()),
        }
    }

    fn status_url(&self, task_id: &TaskId) -> String {
        let id = urlencoding::encode(task_id.as_str());
        match self.dialect {
            WireDialect::JobBackend => {
                format!("{}/api/py/reddit/reddit-commentary/status/{}", self.base(), id)
            }
            WireDialect::Gateway => format!("{}/api/jobs/{}/status", self.base(), id),
        }
    }
}

#[derive(Serialize)]
struct StartJobBody<'a> {
    source_reference: &'a str,
}

#[derive(Deserialize)]
struct StartJobResponse {
    task_id: TaskId,
}

/// Status body. The job backend omits `task_id`; the gateway includes it.
#[derive(Deserialize)]
struct StatusBody {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default, alias = "video_url")]
    result_url: Option<String>,
}

/// Error body used by the gateway.
#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default, alias = "errorMessage", alias = "error")]
    detail: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

/// HTTP implementation of [`JobBackend`].
pub struct HttpJobBackend {
    http: Client,
    config: HttpBackendConfig,
}

impl HttpJobBackend {
    pub fn new(config: HttpBackendConfig) -> BackendResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(BackendError::Network)?;

        Ok(Self { http, config })
    }

    pub fn from_env() -> BackendResult<Self> {
        Self::new(HttpBackendConfig::from_env())
    }

    pub fn config(&self) -> &HttpBackendConfig {
        &self.config
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> BackendResult<Response> {
        self.authorize(request).send().await.map_err(|e| {
            if e.is_timeout() {
                BackendError::Timeout(self.config.timeout.as_millis() as u64)
            } else if e.is_connect() || e.is_request() {
                BackendError::unreachable(e.to_string())
            } else {
                BackendError::Network(e)
            }
        })
    }
}

#[async_trait]
impl JobBackend for HttpJobBackend {
    async fn submit(&self, source_reference: &str) -> BackendResult<Submission> {
        let url = self.config.submit_url(source_reference);
        debug!("Submitting job to {}", url);

        let request = match self.config.dialect {
            WireDialect::JobBackend => self.http.post(&url),
            WireDialect::Gateway => self.http.post(&url).json(&StartJobBody { source_reference }),
        };
        let response = self.send(request).await?;
        let status = response.status();
        let admission = admission_from_headers(response.headers(), status);

        if !status.is_success() {
            return Err(error_from_response(response, admission).await);
        }

        let body: StartJobResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

        Ok(Submission {
            task_id: body.task_id,
            admission,
        })
    }

    async fn get_status(&self, task_id: &TaskId) -> BackendResult<TaskRecord> {
        let url = self.config.status_url(task_id);
        let response = self.send(self.http.get(&url)).await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(BackendError::TaskNotFound(task_id.to_string()));
        }
        if !status.is_success() {
            return Err(error_from_response(response, None).await);
        }

        let body: StatusBody = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

        if body.status == NOT_FOUND_STATUS {
            return Err(BackendError::TaskNotFound(task_id.to_string()));
        }

        Ok(TaskRecord {
            task_id: task_id.clone(),
            status: TaskStatus::from(body.status),
            message: body.message.filter(|m| !m.is_empty()),
            error: body.error.filter(|e| !e.is_empty()),
            result_url: body.result_url.filter(|u| !u.is_empty()),
        })
    }
}

/// Read `X-RateLimit-*` headers, if all three are present.
pub fn admission_from_headers(headers: &HeaderMap, status: StatusCode) -> Option<AdmissionDecision> {
    let read = |name: &str| -> Option<i64> { headers.get(name)?.to_str().ok()?.trim().parse().ok() };

    let limit = u32::try_from(read(HEADER_LIMIT)?).ok()?;
    let remaining = u32::try_from(read(HEADER_REMAINING)?).ok()?;
    let reset_at = Utc.timestamp_millis_opt(read(HEADER_RESET)?).single()?;

    Some(AdmissionDecision {
        allowed: status != StatusCode::TOO_MANY_REQUESTS,
        limit,
        remaining,
        reset_at,
        degraded: false,
    })
}

async fn error_from_response(response: Response, admission: Option<AdmissionDecision>) -> BackendError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let body: Option<ErrorBody> = serde_json::from_str(&text).ok();
    let detail = body
        .as_ref()
        .and_then(|b| b.detail.clone())
        .unwrap_or_else(|| text.clone());
    let code = body.and_then(|b| b.code);

    match status {
        StatusCode::UNAUTHORIZED => BackendError::Unauthenticated(detail),
        StatusCode::TOO_MANY_REQUESTS => match admission {
            Some(decision) => BackendError::QuotaExceeded(decision),
            None => BackendError::rejected(status.as_u16(), detail),
        },
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            BackendError::Unreachable(format!("{}: {}", status, detail))
        }
        _ if code.as_deref() == Some("backend_unreachable") => BackendError::Unreachable(detail),
        _ => BackendError::rejected(status.as_u16(), detail),
    }
}
