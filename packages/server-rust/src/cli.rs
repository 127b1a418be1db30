//! Command-line and environment configuration for the server binary.

use std::time::Duration;

use anyhow::Context;
use axum::http::HeaderName;
use clap::Parser;

use crate::network::{FlowContextConfig, NetworkConfig, REQUEST_ID_HEADER};
use crate::telemetry::LogFormat;

/// Arguments accepted by `demo-server`. Every flag can also be set through
/// the environment variable named next to it.
#[derive(Debug, Clone, Parser)]
#[command(name = "demo-server", about = "HTTP server with per-request flow context")]
pub struct ServerArgs {
    /// Bind address.
    #[arg(long, env = "FLOWCTX_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on (0 for an OS-assigned port).
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Allowed CORS origins, comma separated. `*` allows any origin.
    #[arg(long, env = "FLOWCTX_CORS_ORIGINS", value_delimiter = ',', default_value = "*")]
    pub cors_origins: Vec<String>,

    /// Maximum request processing time in seconds.
    #[arg(long, env = "FLOWCTX_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// Store the raw request head and a response handle in every flow context.
    #[arg(long, env = "FLOWCTX_INCLUDE_RAW_HANDLES")]
    pub include_raw_handles: bool,

    /// Inbound header read as the flow id.
    #[arg(long, env = "FLOWCTX_REQUEST_HEADER", default_value = REQUEST_ID_HEADER)]
    pub request_header: String,

    /// Outbound header the flow id is written to.
    #[arg(long, env = "FLOWCTX_RESPONSE_HEADER", default_value = REQUEST_ID_HEADER)]
    pub response_header: String,

    /// Log output format.
    #[arg(long, env = "FLOWCTX_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

impl ServerArgs {
    /// Converts the arguments into the server's network configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a header name is not a valid HTTP header name.
    pub fn network_config(&self) -> anyhow::Result<NetworkConfig> {
        let request_header = parse_header(&self.request_header)
            .context("invalid --request-header")?;
        let response_header = parse_header(&self.response_header)
            .context("invalid --response-header")?;

        Ok(NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            cors_origins: self.cors_origins.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            flow: FlowContextConfig {
                include_raw_handles: self.include_raw_handles,
                request_header,
                response_header,
            },
        })
    }
}

fn parse_header(name: &str) -> anyhow::Result<HeaderName> {
    HeaderName::from_bytes(name.trim().to_ascii_lowercase().as_bytes())
        .with_context(|| format!("`{name}` is not a valid header name"))
}
