//! Shared data models for reelgate.
//!
//! This crate provides Serde-serializable types for:
//! - Caller identity keys (the rate-limit partition key)
//! - Admission decisions and their response metadata
//! - Task records and task status tags reported by the job backend

pub mod admission;
pub mod identity;
pub mod task;

// Re-export common types
pub use admission::AdmissionDecision;
pub use identity::{IdentityKey, IdentityKeyError};
pub use task::{StatusTag, TaskId, TaskRecord, TaskStatus};
