//! Caller identity resolution.
//!
//! The admission gate only needs two capabilities from an identity provider:
//! turn a request into a caller (or nobody), and decide whether a route may
//! be reached without one. Production deployments verify RS256 bearer JWTs
//! against a JWKS endpoint; local development can use a static token map.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reelgate_models::IdentityKey;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::gate::RouteClass;

/// JWKS cache TTL.
const JWKS_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Minimum spacing between refreshes triggered by an unknown key ID.
const MIN_KID_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    /// Rate-limit partition key derived from the provider subject
    pub key: IdentityKey,
    pub email: Option<String>,
}

impl AuthUser {
    pub fn subject(&self) -> &str {
        self.key.as_str()
    }
}

/// Result of the route protection check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    Allow,
    Deny,
}

/// Identity capability consumed by the admission gate.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve the caller behind a request, if any.
    ///
    /// Invalid or expired credentials resolve to `None`.
    async fn resolve_identity(&self, headers: &HeaderMap) -> Option<AuthUser>;

    /// Decide whether a route may be reached by this caller.
    fn protect(&self, class: RouteClass, identity: Option<&AuthUser>) -> Protection {
        if class.requires_auth() && identity.is_none() {
            Protection::Deny
        } else {
            Protection::Allow
        }
    }
}

/// Extract a bearer token from the Authorization header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

/// Build an [`AuthUser`] from a provider subject, dropping malformed ones.
fn user_from_subject(subject: &str, email: Option<String>) -> Option<AuthUser> {
    match IdentityKey::new(subject) {
        Ok(key) => Some(AuthUser { key, email }),
        Err(e) => {
            warn!(error = %e, "Rejecting token with malformed subject");
            None
        }
    }
}

// ============================================================================
// JWKS
// ============================================================================

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Invalid token header: {0}")]
    InvalidHeader(String),

    #[error("Token missing key ID")]
    MissingKeyId,

    #[error("Unknown key ID: {0}")]
    UnknownKeyId(String),

    #[error("Token validation failed: {0}")]
    Invalid(String),

    #[error("JWKS fetch failed: {0}")]
    Jwks(String),
}

/// JWKS verifier configuration.
#[derive(Debug, Clone)]
pub struct JwksConfig {
    pub jwks_url: String,
    /// Expected `iss`, unchecked when unset
    pub issuer: Option<String>,
    /// Expected `aud`, unchecked when unset
    pub audience: Option<String>,
    pub cache_ttl: Duration,
    pub timeout: Duration,
}

impl JwksConfig {
    pub fn new(jwks_url: impl Into<String>) -> Self {
        Self {
            jwks_url: jwks_url.into(),
            issuer: None,
            audience: None,
            cache_ttl: JWKS_CACHE_TTL,
            timeout: Duration::from_secs(10),
        }
    }

    /// Load from `JWKS_URL`, `JWT_ISSUER` and `JWT_AUDIENCE`.
    /// Returns `None` when `JWKS_URL` is not set.
    pub fn from_env() -> Option<Self> {
        let jwks_url = std::env::var("JWKS_URL").ok().filter(|s| !s.is_empty())?;
        Some(Self {
            issuer: std::env::var("JWT_ISSUER").ok().filter(|s| !s.is_empty()),
            audience: std::env::var("JWT_AUDIENCE").ok().filter(|s| !s.is_empty()),
            ..Self::new(jwks_url)
        })
    }
}

/// Decoded token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: i64,
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<JwkKey>,
}

#[derive(Debug, Clone, Deserialize)]
struct JwkKey {
    #[serde(default)]
    kid: Option<String>,
    kty: String,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

/// RS256 JWT verifier with a cached key set.
pub struct JwksIdentityProvider {
    http: Client,
    config: JwksConfig,
    keys: RwLock<HashMap<String, DecodingKey>>,
    last_refresh: RwLock<Option<Instant>>,
}

impl JwksIdentityProvider {
    /// Create a verifier. Keys are fetched on first use.
    pub fn new(config: JwksConfig) -> Result<Self, IdentityError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| IdentityError::Jwks(e.to_string()))?;

        Ok(Self {
            http,
            config,
            keys: RwLock::new(HashMap::new()),
            last_refresh: RwLock::new(None),
        })
    }

    /// Refresh JWKS keys.
    async fn refresh_keys(&self) -> Result<(), IdentityError> {
        debug!("Refreshing JWKS keys from {}", self.config.jwks_url);

        // Failed fetches count toward the refresh interval too
        *self.last_refresh.write().await = Some(Instant::now());

        let jwks: JwksResponse = self
            .http
            .get(&self.config.jwks_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| IdentityError::Jwks(e.to_string()))?
            .json()
            .await
            .map_err(|e| IdentityError::Jwks(e.to_string()))?;

        let mut keys = HashMap::new();
        for jwk in jwks.keys {
            let (Some(kid), Some(n), Some(e)) = (jwk.kid, jwk.n, jwk.e) else {
                continue;
            };
            if jwk.kty != "RSA" {
                continue;
            }
            match DecodingKey::from_rsa_components(&n, &e) {
                Ok(key) => {
                    keys.insert(kid, key);
                }
                Err(err) => warn!(kid = %kid, error = %err, "Skipping unusable JWKS key"),
            }
        }

        let key_count = keys.len();
        *self.keys.write().await = keys;

        debug!("Refreshed {} JWKS keys", key_count);
        Ok(())
    }

    async fn refreshed_since(&self, age: Duration) -> bool {
        matches!(*self.last_refresh.read().await, Some(at) if at.elapsed() < age)
    }

    /// Get decoding key for a key ID.
    async fn get_key(&self, kid: &str) -> Result<DecodingKey, IdentityError> {
        if !self.refreshed_since(self.config.cache_ttl).await {
            if let Err(e) = self.refresh_keys().await {
                warn!("Failed to refresh JWKS keys: {}", e);
            }
        }

        if let Some(key) = self.keys.read().await.get(kid) {
            return Ok(key.clone());
        }

        // Key rotation: refetch once, at most every MIN_KID_REFRESH_INTERVAL
        if !self.refreshed_since(MIN_KID_REFRESH_INTERVAL).await {
            self.refresh_keys().await?;
        }

        self.keys
            .read()
            .await
            .get(kid)
            .cloned()
            .ok_or_else(|| IdentityError::UnknownKeyId(kid.to_string()))
    }

    /// Verify a bearer token.
    pub async fn verify_token(&self, token: &str) -> Result<Claims, IdentityError> {
        let header = decode_header(token).map_err(|e| IdentityError::InvalidHeader(e.to_string()))?;
        let kid = header.kid.ok_or(IdentityError::MissingKeyId)?;
        let key = self.get_key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        if let Some(issuer) = &self.config.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &self.config.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        let token_data = decode::<Claims>(token, &key, &validation)
            .map_err(|e| IdentityError::Invalid(e.to_string()))?;

        Ok(token_data.claims)
    }

    #[cfg(test)]
    async fn key_count(&self) -> usize {
        self.keys.read().await.len()
    }
}

#[async_trait]
impl IdentityProvider for JwksIdentityProvider {
    async fn resolve_identity(&self, headers: &HeaderMap) -> Option<AuthUser> {
        let token = bearer_token(headers)?;
        match self.verify_token(token).await {
            Ok(claims) => user_from_subject(&claims.sub, claims.email),
            Err(e) => {
                debug!(error = %e, "Bearer token rejected");
                None
            }
        }
    }
}

// ============================================================================
// Static tokens
// ============================================================================

/// Fixed token-to-subject map for local development.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenIdentityProvider {
    tokens: HashMap<String, String>,
}

impl StaticTokenIdentityProvider {
    pub fn new<I, T, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = (T, S)>,
        T: Into<String>,
        S: Into<String>,
    {
        Self {
            tokens: tokens
                .into_iter()
                .map(|(t, s)| (t.into(), s.into()))
                .collect(),
        }
    }

    /// Parse `STATIC_TOKENS` as `token:subject` pairs separated by commas.
    pub fn from_env() -> Option<Self> {
        let raw = std::env::var("STATIC_TOKENS").ok()?;
        Some(Self::parse(&raw))
    }

    fn parse(raw: &str) -> Self {
        Self::new(raw.split(',').filter_map(|pair| {
            let (token, subject) = pair.trim().split_once(':')?;
            let (token, subject) = (token.trim(), subject.trim());
            (!token.is_empty() && !subject.is_empty()).then_some((token, subject))
        }))
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl IdentityProvider for StaticTokenIdentityProvider {
    async fn resolve_identity(&self, headers: &HeaderMap) -> Option<AuthUser> {
        let token = bearer_token(headers)?;
        let subject = self.tokens.get(token)?;
        user_from_subject(subject, None)
    }
}

// ============================================================================
// Extractor
// ============================================================================

/// Axum extractor for the caller resolved by the admission gate.
#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(ApiError::Unauthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn auth_headers(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        headers
    }

    fn hs256_token(kid: Option<&str>) -> String {
        let mut header = Header::default();
        header.kid = kid.map(str::to_string);
        let claims = Claims {
            sub: "user-1".to_string(),
            email: None,
            exp: chrono::Utc::now().timestamp() + 3600,
        };
        encode(&header, &claims, &EncodingKey::from_secret(b"secret")).unwrap()
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(&auth_headers("abc")), Some("abc"));
        assert_eq!(bearer_token(&HeaderMap::new()), None);

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_default_protection() {
        let provider = StaticTokenIdentityProvider::default();
        let user = AuthUser {
            key: IdentityKey::new("alice").unwrap(),
            email: None,
        };

        assert_eq!(provider.protect(RouteClass::Public, None), Protection::Allow);
        assert_eq!(provider.protect(RouteClass::RateLimited, None), Protection::Allow);
        assert_eq!(provider.protect(RouteClass::RequiresAuth, None), Protection::Deny);
        assert_eq!(
            provider.protect(RouteClass::ProtectedRateLimited, None),
            Protection::Deny
        );
        assert_eq!(
            provider.protect(RouteClass::ProtectedRateLimited, Some(&user)),
            Protection::Allow
        );
    }

    #[tokio::test]
    async fn test_static_tokens() {
        let provider = StaticTokenIdentityProvider::parse("tok-a:alice, tok-b:bob,broken,:x");
        assert_eq!(provider.len(), 2);

        let user = provider.resolve_identity(&auth_headers("tok-a")).await.unwrap();
        assert_eq!(user.subject(), "alice");
        assert!(provider.resolve_identity(&auth_headers("nope")).await.is_none());
        assert!(provider.resolve_identity(&HeaderMap::new()).await.is_none());
    }

    #[tokio::test]
    async fn test_jwks_token_without_kid_is_rejected_without_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"keys": []})))
            .expect(0)
            .mount(&server)
            .await;

        let provider =
            JwksIdentityProvider::new(JwksConfig::new(format!("{}/jwks", server.uri()))).unwrap();
        let err = provider.verify_token(&hs256_token(None)).await.unwrap_err();
        assert!(matches!(err, IdentityError::MissingKeyId));
    }

    #[tokio::test]
    async fn test_jwks_unknown_kid_resolves_to_nobody() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"keys": []})))
            .expect(1)
            .mount(&server)
            .await;

        let provider =
            JwksIdentityProvider::new(JwksConfig::new(format!("{}/jwks", server.uri()))).unwrap();
        let headers = auth_headers(&hs256_token(Some("k1")));

        assert!(provider.resolve_identity(&headers).await.is_none());
        // A second miss inside the refresh interval does not refetch
        assert!(provider.resolve_identity(&headers).await.is_none());
    }

    #[tokio::test]
    async fn test_jwks_rejects_wrong_algorithm_for_known_kid() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "keys": [
                    {"kid": "k1", "kty": "RSA", "alg": "RS256", "n": "AQAB", "e": "AQAB"},
                    {"kid": "ec", "kty": "EC", "crv": "P-256", "x": "AA", "y": "AA"}
                ]
            })))
            .mount(&server)
            .await;

        let provider =
            JwksIdentityProvider::new(JwksConfig::new(format!("{}/jwks", server.uri()))).unwrap();
        let err = provider.verify_token(&hs256_token(Some("k1"))).await.unwrap_err();

        assert!(matches!(err, IdentityError::Invalid(_)));
        assert_eq!(provider.key_count().await, 1);
    }

    #[tokio::test]
    async fn test_extractor_reads_gate_extension() {
        let user = AuthUser {
            key: IdentityKey::new("alice").unwrap(),
            email: Some("a@example.com".to_string()),
        };
        let request = axum::http::Request::builder()
            .extension(user.clone())
            .body(())
            .unwrap();
        let (mut parts, _) = request.into_parts();
        let extracted = AuthUser::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(extracted, user);

        let (mut parts, _) = axum::http::Request::new(()).into_parts();
        assert!(AuthUser::from_request_parts(&mut parts, &()).await.is_err());
    }
}
