//! API configuration.

/// Upload size limit applied when `MAX_UPLOAD_BYTES` is unset.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 500 * 1024 * 1024; // 500MB

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Largest accepted upload
    pub max_upload_bytes: u64,
    /// Largest variation count a batch may request, `None` for no cap
    pub max_variations: Option<u32>,
    /// Variation count used when the request omits one
    pub default_variations: u32,
    /// Serve Prometheus metrics at /metrics
    pub metrics_enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_variations: None,
            default_variations: 5,
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
            port: env_parse("API_PORT").unwrap_or(defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            max_upload_bytes: env_parse("MAX_UPLOAD_BYTES").unwrap_or(defaults.max_upload_bytes),
            max_variations: env_parse::<u32>("MAX_VARIATIONS")
                .map(|max| (max > 0).then_some(max))
                .unwrap_or(defaults.max_variations),
            default_variations: env_parse("DEFAULT_VARIATIONS")
                .unwrap_or(defaults.default_variations),
            metrics_enabled: std::env::var("METRICS_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.metrics_enabled),
        }
    }

    /// Whether `count` is an acceptable batch size.
    pub fn accepts_variation_count(&self, count: i64) -> bool {
        count >= 1
            && self
                .max_variations
                .map_or(true, |max| count <= i64::from(max))
    }
}

/// Check if running in production mode (`ENVIRONMENT=production`).
pub fn is_production() -> bool {
    std::env::var("ENVIRONMENT")
        .map(|v| v.eq_ignore_ascii_case("production"))
        .unwrap_or(false)
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}
