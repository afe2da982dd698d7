//! Caller-side job lifecycle.
//!
//! This crate provides:
//! - The `JobBackend` contract and its HTTP implementation
//! - Task submission with a caller-facing error taxonomy
//! - A cancellable status poller that runs until a terminal state

pub mod backend;
pub mod error;
pub mod failure;
pub mod http;
pub mod poller;
pub mod submit;

pub use backend::{JobBackend, Submission};
pub use error::{BackendError, BackendResult, SubmissionError};
pub use http::{HttpBackendConfig, HttpJobBackend, WireDialect};
pub use poller::{
    AbandonReason, Backoff, PollHandle, PollMachine, PollOutcome, PollSnapshot, PollState,
    PollStep, PollerConfig, TaskStatusPoller,
};
pub use submit::TaskSubmitter;
