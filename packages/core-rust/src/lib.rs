//! `flowctx` Core — per-flow context store over task-local storage.
//!
//! A [`FlowContext`] is bound to a logical flow (one request and everything
//! it awaits or spawns) with [`ContextStore::run_with_context`], and is then
//! readable and writable from anywhere inside that flow through the same
//! store, without being passed around.

pub mod context;
pub mod error;
pub mod flow_id;
pub mod propagate;
pub mod store;

pub use context::{keys, FlowContext, Handle};
pub use error::ContextError;
pub use flow_id::{accept_external_id, generate_flow_id};
pub use propagate::FlowFutureExt;
pub use store::{ContextStore, FlowHandle};
