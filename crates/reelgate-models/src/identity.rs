//! Caller identity keys.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix for keys derived from unauthenticated callers.
const ANONYMOUS_PREFIX: &str = "anon:";

/// Maximum key length accepted from an identity provider.
const MAX_KEY_LENGTH: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityKeyError {
    #[error("identity key cannot be empty")]
    Empty,

    #[error("identity key exceeds {MAX_KEY_LENGTH} characters")]
    TooLong,

    #[error("identity key contains control characters")]
    ControlCharacters,
}

/// Partition key for rate limiting.
///
/// Authenticated callers are keyed by the provider-issued subject.
/// Unauthenticated callers get their own bucket per client address, so one
/// anonymous caller cannot exhaust another's quota. Callers whose address is
/// unknown share the single `anon:unknown` bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Create a key for an authenticated subject.
    pub fn new(subject: impl Into<String>) -> Result<Self, IdentityKeyError> {
        let subject = subject.into();
        let trimmed = subject.trim();
        if trimmed.is_empty() {
            return Err(IdentityKeyError::Empty);
        }
        if trimmed.len() > MAX_KEY_LENGTH {
            return Err(IdentityKeyError::TooLong);
        }
        if trimmed.chars().any(char::is_control) {
            return Err(IdentityKeyError::ControlCharacters);
        }
        // Subjects may not impersonate the anonymous namespace.
        if trimmed.starts_with(ANONYMOUS_PREFIX) {
            return Ok(Self(format!("user:{}", trimmed)));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Key for an unauthenticated caller.
    pub fn anonymous(addr: Option<IpAddr>) -> Self {
        match addr {
            Some(ip) => Self(format!("{}{}", ANONYMOUS_PREFIX, ip)),
            None => Self(format!("{}unknown", ANONYMOUS_PREFIX)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
