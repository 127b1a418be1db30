//! Network configuration types for the `flowctx` server.

use std::time::Duration;

use axum::http::HeaderName;

/// Header carrying the correlation id in both directions by default.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Top-level network configuration for the server.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Bind address for the server.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,
    /// Maximum time to wait for a request to complete.
    pub request_timeout: Duration,
    /// Flow context adapter settings.
    pub flow: FlowContextConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(30),
            flow: FlowContextConfig::default(),
        }
    }
}

/// Settings for the flow entry adapter ([`super::FlowContextLayer`]).
#[derive(Debug, Clone)]
pub struct FlowContextConfig {
    /// Store the raw request head and a response handle in every context
    /// under the reserved `req` / `res` keys. Off by default so bindings do
    /// not keep transport objects alive.
    pub include_raw_handles: bool,
    /// Inbound header read as the flow id when present.
    pub request_header: HeaderName,
    /// Outbound header the flow id is written to.
    pub response_header: HeaderName,
}

impl Default for FlowContextConfig {
    fn default() -> Self {
        Self {
            include_raw_handles: false,
            request_header: HeaderName::from_static(REQUEST_ID_HEADER),
            response_header: HeaderName::from_static(REQUEST_ID_HEADER),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_config_defaults() {
        let config = NetworkConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 0);
        assert_eq!(config.cors_origins, vec!["*"]);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn flow_context_config_defaults() {
        let config = FlowContextConfig::default();
        assert!(!config.include_raw_handles);
        assert_eq!(config.request_header.as_str(), "x-request-id");
        assert_eq!(config.response_header.as_str(), "x-request-id");
    }
}
