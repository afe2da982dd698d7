//! Axum admission gate and job API.
//!
//! This crate provides:
//! - The admission gate middleware (identity, then per-caller sliding-window quota)
//! - JWKS and static-token identity providers
//! - Job start and job status routes in front of the job backend
//! - Burst throttling, security headers and Prometheus metrics

pub mod config;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod identity;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod security;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use gate::{AdmissionGate, GateOutcome, RouteClass};
pub use identity::{AuthUser, IdentityProvider, JwksIdentityProvider, StaticTokenIdentityProvider};
pub use routes::create_router;
pub use state::AppState;
