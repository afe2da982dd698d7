//! Admission gate.
//!
//! Runs in front of every `/api` route with that route's classification:
//! resolve the caller, reject unauthenticated access to protected routes
//! before any quota is touched, then charge one unit of quota on
//! rate-limited routes. Admission metadata is attached to every response of
//! a rate-limited route, admitted or not.

use std::net::IpAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Request, Response};
use axum::middleware::Next;
use axum::response::IntoResponse;
use reelgate_client::http::{HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET};
use reelgate_models::{AdmissionDecision, IdentityKey};
use reelgate_quota::SlidingWindowLimiter;
use tracing::{debug, info};

use crate::error::ApiError;
use crate::identity::{AuthUser, IdentityProvider, Protection};
use crate::metrics;
use crate::middleware::client_ip;

/// How the gate treats a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    /// No identity required, no quota
    Public,
    /// Identity required, no quota
    RequiresAuth,
    /// Quota charged per identity, anonymous callers per address
    RateLimited,
    /// Identity required and quota charged
    ProtectedRateLimited,
}

impl RouteClass {
    pub fn requires_auth(&self) -> bool {
        matches!(self, RouteClass::RequiresAuth | RouteClass::ProtectedRateLimited)
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RouteClass::RateLimited | RouteClass::ProtectedRateLimited)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RouteClass::Public => "public",
            RouteClass::RequiresAuth => "requires_auth",
            RouteClass::RateLimited => "rate_limited",
            RouteClass::ProtectedRateLimited => "protected_rate_limited",
        }
    }
}

/// What the gate decided for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    Forward {
        caller: Option<AuthUser>,
        /// Present on rate-limited routes
        admission: Option<AdmissionDecision>,
    },
    Unauthenticated,
    QuotaExceeded(AdmissionDecision),
}

/// Identity resolution plus quota evaluation.
pub struct AdmissionGate {
    identity: Arc<dyn IdentityProvider>,
    limiter: Arc<SlidingWindowLimiter>,
}

impl AdmissionGate {
    pub fn new(identity: Arc<dyn IdentityProvider>, limiter: Arc<SlidingWindowLimiter>) -> Self {
        Self { identity, limiter }
    }

    pub fn limiter(&self) -> &Arc<SlidingWindowLimiter> {
        &self.limiter
    }

    /// Evaluate one request.
    pub async fn evaluate(
        &self,
        class: RouteClass,
        headers: &HeaderMap,
        client_ip: Option<IpAddr>,
    ) -> GateOutcome {
        let caller = self.identity.resolve_identity(headers).await;

        if self.identity.protect(class, caller.as_ref()) == Protection::Deny {
            metrics::record_admission(class, "unauthenticated");
            debug!(route_class = class.as_str(), "Rejected unauthenticated request");
            return GateOutcome::Unauthenticated;
        }

        if !class.is_rate_limited() {
            metrics::record_admission(class, "forwarded");
            return GateOutcome::Forward {
                caller,
                admission: None,
            };
        }

        let key = match &caller {
            Some(user) => user.key.clone(),
            None => IdentityKey::anonymous(client_ip),
        };
        let decision = self.limiter.check(&key).await;

        if !decision.allowed {
            metrics::record_admission(class, "denied");
            info!(
                identity = %key,
                limit = decision.limit,
                reset_at = %decision.reset_at,
                "Quota exceeded"
            );
            return GateOutcome::QuotaExceeded(decision);
        }

        let outcome = if decision.degraded { "fail_open" } else { "allowed" };
        metrics::record_admission(class, outcome);
        GateOutcome::Forward {
            caller,
            admission: Some(decision),
        }
    }
}

/// Write `X-RateLimit-*` headers for a decision.
pub fn attach_admission_headers(headers: &mut HeaderMap, decision: &AdmissionDecision) {
    headers.insert(HEADER_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(HEADER_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(HEADER_RESET, HeaderValue::from(decision.reset_at_ms()));
}

/// Middleware state: the shared gate plus the classification of the routes
/// this layer wraps.
#[derive(Clone)]
pub struct GateState {
    pub gate: Arc<AdmissionGate>,
    pub class: RouteClass,
}

impl GateState {
    pub fn new(gate: Arc<AdmissionGate>, class: RouteClass) -> Self {
        Self { gate, class }
    }
}

/// Admission gate middleware.
pub async fn admission_gate(
    State(state): State<GateState>,
    mut request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let ip = client_ip(&request);

    match state.gate.evaluate(state.class, request.headers(), ip).await {
        GateOutcome::Forward { caller, admission } => {
            if let Some(user) = caller {
                request.extensions_mut().insert(user);
            }
            if let Some(decision) = &admission {
                request.extensions_mut().insert(decision.clone());
            }

            let mut response = next.run(request).await;
            if let Some(decision) = admission {
                attach_admission_headers(response.headers_mut(), &decision);
            }
            response
        }
        GateOutcome::Unauthenticated => ApiError::Unauthenticated.into_response(),
        GateOutcome::QuotaExceeded(decision) => ApiError::QuotaExceeded(decision).into_response(),
    }
}
