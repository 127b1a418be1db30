//! HTTP handler definitions for the `flowctx` server.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors) and re-exports all handler functions for convenient access
//! when building the router.

pub mod health;

pub use health::{health_handler, liveness_handler};

use std::time::Instant;

use flowctx_core::ContextStore;

/// Shared application state passed to the server's own handlers via `State`
/// extraction. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// The process-wide context store.
    pub store: ContextStore,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
}
