//! Source reference validation.
//!
//! Job sources are fetched server-side by the job backend, so only public
//! post URLs on the supported hosts are accepted.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use thiserror::Error;
use tracing::warn;
use url::{Host, Url};

/// Maximum URL length to prevent DoS attacks.
pub const MAX_URL_LENGTH: usize = 2048;

/// Hosts accepted as job sources, including their subdomains.
const ALLOWED_DOMAINS: &[&str] = &["reddit.com", "redd.it"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceReferenceError {
    #[error("Source URL cannot be empty")]
    Empty,

    #[error("URL exceeds maximum length of {MAX_URL_LENGTH} characters")]
    TooLong,

    #[error("Invalid URL format: {0}")]
    Malformed(String),

    #[error("Invalid protocol '{0}'. Only HTTP and HTTPS are allowed.")]
    UnsupportedScheme(String),

    #[error("Domain '{0}' is not allowed. Please use a Reddit post URL.")]
    DomainNotAllowed(String),

    #[error("URL appears to target an internal or restricted endpoint")]
    Blocked,
}

/// Validate a caller-supplied source URL, returning its normalized form.
pub fn validate_source_reference(input: &str) -> Result<String, SourceReferenceError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(SourceReferenceError::Empty);
    }
    if input.len() > MAX_URL_LENGTH {
        return Err(SourceReferenceError::TooLong);
    }

    let parsed = Url::parse(input).map_err(|e| SourceReferenceError::Malformed(e.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => return Err(SourceReferenceError::UnsupportedScheme(scheme.to_string())),
    }

    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(SourceReferenceError::Malformed(
            "credentials are not allowed in source URLs".to_string(),
        ));
    }

    let domain = match parsed.host() {
        Some(Host::Domain(domain)) => domain.to_lowercase(),
        Some(Host::Ipv4(ip)) => return Err(reject_ip(input, IpAddr::V4(ip))),
        Some(Host::Ipv6(ip)) => return Err(reject_ip(input, IpAddr::V6(ip))),
        None => return Err(SourceReferenceError::Malformed("URL must have a host".to_string())),
    };

    if domain == "localhost" || domain.ends_with(".localhost") || domain.ends_with(".internal") {
        warn!(url = %input, "Blocked internal source host");
        return Err(SourceReferenceError::Blocked);
    }

    if !is_domain_allowed(&domain) {
        return Err(SourceReferenceError::DomainNotAllowed(domain));
    }

    Ok(parsed.to_string())
}

/// IP literals are never valid sources; internal ones are worth a warning.
fn reject_ip(input: &str, ip: IpAddr) -> SourceReferenceError {
    if is_internal_ip(ip) {
        warn!(url = %input, "Blocked internal source address");
        SourceReferenceError::Blocked
    } else {
        SourceReferenceError::DomainNotAllowed(ip.to_string())
    }
}

fn is_internal_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_internal_v4(v4),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_internal_v4(mapped);
            }
            is_internal_v6(v6)
        }
    }
}

fn is_internal_v4(ip: Ipv4Addr) -> bool {
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        // Carrier-grade NAT 100.64.0.0/10
        || (ip.octets()[0] == 100 && (ip.octets()[1] & 0xC0) == 64)
}

fn is_internal_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
}

/// Check a host against the allow list, accepting subdomains.
fn is_domain_allowed(domain: &str) -> bool {
    ALLOWED_DOMAINS.iter().any(|allowed| {
        domain == *allowed
            || domain
                .strip_suffix(allowed)
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}
