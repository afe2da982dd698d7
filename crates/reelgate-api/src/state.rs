//! Application state.

use std::sync::Arc;

use reelgate_client::{HttpJobBackend, JobBackend, TaskSubmitter};
use reelgate_quota::{CounterStore, LimiterConfig, RedisCounterStore, SlidingWindowLimiter};
use tracing::{info, warn};

use crate::config::ApiConfig;
use crate::gate::AdmissionGate;
use crate::identity::{
    IdentityProvider, JwksConfig, JwksIdentityProvider, StaticTokenIdentityProvider,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub backend: Arc<dyn JobBackend>,
    pub submitter: TaskSubmitter,
    pub gate: Arc<AdmissionGate>,
}

impl AppState {
    /// Assemble state from already-built components.
    pub fn new(
        config: ApiConfig,
        backend: Arc<dyn JobBackend>,
        limiter: Arc<SlidingWindowLimiter>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            config,
            submitter: TaskSubmitter::new(Arc::clone(&backend)),
            backend,
            gate: Arc::new(AdmissionGate::new(identity, limiter)),
        }
    }

    /// Build production state from environment variables.
    pub fn from_env(config: ApiConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn CounterStore> = Arc::new(RedisCounterStore::from_env()?);
        let limiter_config = LimiterConfig::from_env();
        info!(
            limit = limiter_config.limit,
            window_secs = limiter_config.window.as_secs(),
            "Job quota configured"
        );
        let limiter = Arc::new(SlidingWindowLimiter::new(store, limiter_config));

        let backend: Arc<dyn JobBackend> = Arc::new(HttpJobBackend::from_env()?);
        let identity = identity_from_env(&config)?;

        Ok(Self::new(config, backend, limiter, identity))
    }

    pub fn limiter(&self) -> &Arc<SlidingWindowLimiter> {
        self.gate.limiter()
    }
}

fn identity_from_env(config: &ApiConfig) -> anyhow::Result<Arc<dyn IdentityProvider>> {
    if let Some(jwks) = JwksConfig::from_env() {
        info!(jwks_url = %jwks.jwks_url, "Using JWKS identity provider");
        return Ok(Arc::new(JwksIdentityProvider::new(jwks)?));
    }

    if config.is_production() {
        anyhow::bail!("JWKS_URL must be set in production");
    }

    let provider = StaticTokenIdentityProvider::from_env().unwrap_or_default();
    warn!(
        tokens = provider.len(),
        "JWKS_URL not set, using static development tokens"
    );
    Ok(Arc::new(provider))
}
