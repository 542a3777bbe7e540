//! API configuration.

use std::time::Duration;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    /// Per-client requests per second on `/api`
    pub rate_limit_rps: u32,
    pub request_timeout: Duration,
    /// Max request body size in bytes
    pub max_body_size: usize,
    /// development or production
    pub environment: String,
    /// Serve Prometheus metrics at `/metrics`
    pub metrics_enabled: bool,
    /// Prefix for artifact URLs in job results; relative URLs when unset
    pub public_base_url: Option<String>,
    pub ws_heartbeat: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            rate_limit_rps: 10,
            request_timeout: Duration::from_secs(30),
            max_body_size: 1024 * 1024,
            environment: "development".to_string(),
            metrics_enabled: true,
            public_base_url: None,
            ws_heartbeat: Duration::from_secs(30),
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: parse_env("API_PORT").unwrap_or(defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| {
                    s.split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.cors_origins),
            rate_limit_rps: parse_env("RATE_LIMIT_RPS").unwrap_or(defaults.rate_limit_rps),
            request_timeout: parse_env("REQUEST_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            max_body_size: parse_env("MAX_BODY_SIZE").unwrap_or(defaults.max_body_size),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            metrics_enabled: std::env::var("METRICS_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.metrics_enabled),
            public_base_url: std::env::var("PUBLIC_BASE_URL")
                .ok()
                .map(|u| u.trim_end_matches('/').to_string())
                .filter(|u| !u.is_empty()),
            ws_heartbeat: parse_env("WS_HEARTBEAT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.ws_heartbeat),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }

    /// Public URL for an API path such as `/api/jobs/{id}/video`.
    pub fn public_url(&self, path: &str) -> String {
        match &self.public_base_url {
            Some(base) => format!("{}{}", base, path),
            None => path.to_string(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var("API_PORT", "9090");
        std::env::set_var("CORS_ORIGINS", "https://a.example, https://b.example,");
        std::env::set_var("METRICS_ENABLED", "false");
        std::env::set_var("PUBLIC_BASE_URL", "https://reels.example/");
        let config = ApiConfig::from_env();
        for key in ["API_PORT", "CORS_ORIGINS", "METRICS_ENABLED", "PUBLIC_BASE_URL"] {
            std::env::remove_var(key);
        }

        assert_eq!(config.port, 9090);
        assert_eq!(config.cors_origins, vec!["https://a.example", "https://b.example"]);
        assert!(!config.metrics_enabled);
        assert_eq!(
            config.public_url("/api/jobs/x/video"),
            "https://reels.example/api/jobs/x/video"
        );
    }

    #[test]
    fn test_relative_urls_by_default() {
        let config = ApiConfig::default();
        assert_eq!(config.public_url("/api/jobs/x/video"), "/api/jobs/x/video");
        assert!(!config.is_production());
    }
}
