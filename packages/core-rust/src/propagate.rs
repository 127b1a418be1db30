//! Carrying a flow binding into spawned tasks.
//!
//! A `tokio` task is a new causal root: `tokio::spawn` does not inherit the
//! spawner's task-locals. These helpers capture the current [`FlowHandle`] at
//! spawn time and re-bind it inside the new task, so work fanned out from a
//! flow keeps reading and writing the same context. Outside a flow they behave
//! exactly like their `tokio` counterparts.

use std::future::Future;

use tokio::task::JoinHandle;

use crate::store::FlowHandle;

/// Wraps `fut` so it is polled inside the caller's flow, wherever it ends up
/// running.
pub fn in_current_flow<F>(fut: F) -> impl Future<Output = F::Output>
where
    F: Future,
{
    let handle = FlowHandle::current();
    async move {
        match handle {
            Some(handle) => handle.scope(fut).await,
            None => fut.await,
        }
    }
}

/// Extension trait binding futures to the caller's flow, in the manner of
/// `tracing::Instrument`.
pub trait FlowFutureExt: Future + Sized {
    /// Wraps `self` so it is polled inside the flow current at the call
    /// site. Outside a flow the future is returned as-is.
    fn in_current_flow(self) -> impl Future<Output = Self::Output> {
        in_current_flow(self)
    }
}

impl<F: Future> FlowFutureExt for F {}

/// `tokio::spawn` that keeps the current flow bound in the new task.
pub fn spawn<F>(fut: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match FlowHandle::current() {
        Some(handle) => tokio::spawn(handle.scope(fut)),
        None => tokio::spawn(fut),
    }
}

/// `tokio::task::spawn_blocking` that keeps the current flow bound on the
/// blocking thread.
pub fn spawn_blocking<F, R>(f: F) -> JoinHandle<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let handle = FlowHandle::current();
    tokio::task::spawn_blocking(move || match handle {
        Some(handle) => handle.sync_scope(f),
        None => f(),
    })
}
