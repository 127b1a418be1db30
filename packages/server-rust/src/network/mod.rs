//! Networking types, configuration, the flow entry adapter and the server
//! lifecycle module.

pub mod config;
pub mod flow_context;
pub mod handlers;
pub mod middleware;
pub mod module;

pub use config::*;
pub use flow_context::{FlowContextLayer, FlowContextService, RequestHead, ResponseHandle};
pub use handlers::AppState;
pub use module::NetworkModule;
