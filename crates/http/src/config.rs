use std::time::Duration;

/// HTTP API settings.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Base URL the endpoint paths are joined onto (default:
    /// `http://localhost:3000`).
    pub base_url: String,
    /// Upper bound on a whole request, connect through body (default: 10s).
    pub timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}
