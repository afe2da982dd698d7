//! API configuration.

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Per-IP ingress burst throttle, requests per second
    pub burst_rps: u32,
    /// Max request body size
    pub max_body_size: usize,
    /// Environment (development/production)
    pub environment: String,
    /// Serve Prometheus metrics at /metrics
    pub metrics_enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            burst_rps: 10,
            max_body_size: 64 * 1024,
            environment: "development".to_string(),
            metrics_enabled: true,
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| {
                    s.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.cors_origins),
            burst_rps: std::env::var("BURST_RPS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.burst_rps),
            max_body_size: std::env::var("MAX_BODY_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_body_size),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            metrics_enabled: std::env::var("METRICS_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.metrics_enabled),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        is_production_environment(&self.environment)
    }
}

/// Whether an `ENVIRONMENT` value names production, ignoring case and padding.
pub fn is_production_environment(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("production")
}

/// Whether the process `ENVIRONMENT` variable names production.
pub fn running_in_production() -> bool {
    std::env::var("ENVIRONMENT")
        .map(|v| is_production_environment(&v))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ApiConfig::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.burst_rps, 10);
        assert!(!config.is_production());

        let prod = ApiConfig {
            environment: "Production".to_string(),
            ..Default::default()
        };
        assert!(prod.is_production());
    }

    #[test]
    fn test_production_environment_ignores_case() {
        for value in ["production", "Production", "PRODUCTION", " production "] {
            assert!(is_production_environment(value), "{value}");
        }
        for value in ["", "development", "staging", "prod"] {
            assert!(!is_production_environment(value), "{value}");
        }
    }
}
