//! Demo HTTP server: every request runs in its own flow context.
//!
//! Try `GET /api/users`, `GET /api/error` and `GET /health`, with or without
//! an `x-request-id` header.

use clap::Parser;
use flowctx_server::demo::demo_routes;
use flowctx_server::{init_tracing, NetworkModule, ServerArgs};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServerArgs::parse();
    init_tracing(args.log_format)?;

    let mut module = NetworkModule::new(args.network_config()?);
    let routes = demo_routes(module.store());

    let port = module.start().await?;
    info!("Try accessing: http://localhost:{port}/api/users");
    info!("Try accessing: http://localhost:{port}/api/error");

    module.serve(routes, shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
