//! Service configuration.

use tally_meter::ProviderMode;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to the `RocksDB` data directory (default: "/data/tally").
    pub data_dir: String,

    /// Metering provider API URL (optional; no delivery without it).
    pub meter_api_url: Option<String>,

    /// Metering provider API key (optional).
    pub meter_api_key: Option<String>,

    /// Provider pacing mode (default: test).
    pub meter_mode: ProviderMode,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Interval between reconciliation runs, in seconds.
    pub reconcile_interval_seconds: u64,
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            data_dir: std::env::var("DATA_DIR").unwrap_or_else(|_| "/data/tally".into()),
            meter_api_url: std::env::var("METER_API_URL").ok(),
            meter_api_key: std::env::var("METER_API_KEY").ok(),
            meter_mode: match std::env::var("METER_MODE").as_deref() {
                Ok("live") => ProviderMode::Live,
                _ => ProviderMode::Test,
            },
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: std::env::var("MAX_BODY_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1024 * 1024), // 1MB
            request_timeout_seconds: std::env::var("REQUEST_TIMEOUT_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
            reconcile_interval_seconds: std::env::var("RECONCILE_INTERVAL_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3600),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/tally".into(),
            meter_api_url: None,
            meter_api_key: None,
            meter_mode: ProviderMode::Test,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
            reconcile_interval_seconds: 3600,
        }
    }
}
