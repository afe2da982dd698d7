//! Task records reported by the job backend.
//!
//! The backend owns task state; these types are read-only snapshots
//! of what it reported on one status query.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque task identifier assigned by the job backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the ID is safe to embed in a URL path segment.
    ///
    /// Backend IDs look like `<uuid>` or `<uuid>_<epoch.fraction>`.
    pub fn is_well_formed(&self) -> bool {
        let id = self.0.as_str();
        if id.is_empty() || id.len() > 128 {
            return false;
        }
        id.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !id.contains("..")
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Non-terminal sub-status reported by the backend.
///
/// Purely informational: the poller never branches on it. The backend may
/// add new tags at any time, so this is an open string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatusTag(String);

impl StatusTag {
    pub const SUBMITTED: &'static str = "submitted";
    pub const FETCHING_SOURCE: &'static str = "fetching_source";
    pub const GENERATING_SCRIPT: &'static str = "generating_script";
    pub const GENERATING_VOICEOVER: &'static str = "generating_voiceover";
    pub const FETCHING_ASSET: &'static str = "fetching_asset";
    pub const RENDERING: &'static str = "rendering";
    pub const FINALIZING: &'static str = "finalizing";

    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Human-readable description for progress displays.
    pub fn description(&self) -> &str {
        match self.0.as_str() {
            Self::SUBMITTED | "pending" => "Waiting for a worker",
            Self::FETCHING_SOURCE => "Fetching the source post",
            Self::GENERATING_SCRIPT => "Writing the script",
            Self::GENERATING_VOICEOVER => "Recording the voiceover",
            Self::FETCHING_ASSET => "Fetching background footage",
            Self::RENDERING => "Rendering the video",
            Self::FINALIZING => "Uploading the result",
            _ => "Processing",
        }
    }
}

impl fmt::Display for StatusTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task status as it drives control flow.
///
/// Serialized as the backend's plain status string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskStatus {
    /// Still running; the tag says where
    InProgress(StatusTag),
    /// Finished with a result asset
    Completed,
    /// Finished with an error
    Failed,
}

impl TaskStatus {
    pub const COMPLETED: &'static str = "completed";
    pub const FAILED: &'static str = "failed";

    pub fn in_progress(tag: impl Into<String>) -> Self {
        Self::InProgress(StatusTag::new(tag))
    }

    /// Get string representation of the status.
    pub fn as_str(&self) -> &str {
        match self {
            TaskStatus::InProgress(tag) => tag.as_str(),
            TaskStatus::Completed => Self::COMPLETED,
            TaskStatus::Failed => Self::FAILED,
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl From<String> for TaskStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            Self::COMPLETED => TaskStatus::Completed,
            Self::FAILED => TaskStatus::Failed,
            _ => TaskStatus::InProgress(StatusTag(s)),
        }
    }
}

impl From<TaskStatus> for String {
    fn from(status: TaskStatus) -> Self {
        match status {
            TaskStatus::InProgress(tag) => tag.0,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot of a task as reported by one status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Location of the finished video
    #[serde(default, alias = "video_url", skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
}

impl TaskRecord {
    pub fn new(task_id: TaskId, status: TaskStatus) -> Self {
        Self {
            task_id,
            status,
            message: None,
            error: None,
            result_url: None,
        }
    }

    pub fn completed(task_id: TaskId, result_url: impl Into<String>) -> Self {
        Self {
            result_url: Some(result_url.into()),
            ..Self::new(task_id, TaskStatus::Completed)
        }
    }

    pub fn failed(task_id: TaskId, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(task_id, TaskStatus::Failed)
        }
    }
}
