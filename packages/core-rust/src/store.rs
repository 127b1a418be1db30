//! Continuation-local context store.
//!
//! The current flow lives in a `tokio` task-local slot. A binding made with
//! [`ContextStore::run_with_context`] travels with the future it wraps, so it
//! survives every `.await` (timers, channel receives, nested async calls) and
//! is never visible to other futures, even when they interleave on the same
//! worker thread. Nested bindings shadow the outer one for exactly their own
//! extent. Spawned tasks start unbound; see [`crate::propagate`] for helpers
//! that carry the binding into them.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace};

use crate::context::FlowContext;
use crate::error::ContextError;

tokio::task_local! {
    static CURRENT_FLOW: FlowHandle;
}

type CompletionHook = Box<dyn FnOnce(&FlowContext) + Send>;

// ---------------------------------------------------------------------------
// FlowHandle
// ---------------------------------------------------------------------------

/// Shared reference to one flow's context and completion hooks.
///
/// This is the value held in the task-local slot. Cloning it does not copy
/// the context: every clone observes and mutates the same record.
#[derive(Clone)]
pub struct FlowHandle {
    cell: Arc<FlowCell>,
}

struct FlowCell {
    context: Mutex<FlowContext>,
    hooks: Mutex<Vec<CompletionHook>>,
    completed: AtomicBool,
}

impl FlowHandle {
    fn new(context: FlowContext) -> Self {
        Self {
            cell: Arc::new(FlowCell {
                context: Mutex::new(context),
                hooks: Mutex::new(Vec::new()),
                completed: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the handle bound to the calling task, if any.
    #[must_use]
    pub fn current() -> Option<Self> {
        CURRENT_FLOW.try_with(Clone::clone).ok()
    }

    /// Polls `fut` with this flow bound.
    pub fn scope<F>(self, fut: F) -> impl Future<Output = F::Output>
    where
        F: Future,
    {
        CURRENT_FLOW.scope(self, fut)
    }

    /// Runs `f` with this flow bound.
    pub fn sync_scope<R>(self, f: impl FnOnce() -> R) -> R {
        CURRENT_FLOW.sync_scope(self, f)
    }

    /// Copy of the context as it is right now.
    #[must_use]
    pub fn snapshot(&self) -> FlowContext {
        self.cell.context.lock().clone()
    }

    #[must_use]
    pub fn flow_id(&self) -> String {
        self.cell.context.lock().flow_id.clone()
    }

    /// Returns `true` if both handles refer to the same flow.
    #[must_use]
    pub fn same_flow(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl std::fmt::Debug for FlowHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowHandle")
            .field("flow_id", &self.flow_id())
            .field("completed", &self.cell.completed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ContextStore
// ---------------------------------------------------------------------------

/// Process-wide access point to the per-flow context.
///
/// Construct one at startup and hand clones to the code that needs it; all
/// clones share the flow counters. Every accessor is safe to call outside a
/// flow and degrades to `None` / `false` there.
#[derive(Debug, Clone, Default)]
pub struct ContextStore {
    stats: Arc<FlowStats>,
}

#[derive(Debug, Default)]
struct FlowStats {
    active: AtomicU64,
    total: AtomicU64,
}

impl ContextStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the context bound to the calling code, `None` outside a flow.
    #[must_use]
    pub fn current_context(&self) -> Option<FlowContext> {
        FlowHandle::current().map(|h| h.snapshot())
    }

    /// Like [`current_context`](Self::current_context) for callers that
    /// require a flow.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::NoActiveFlow`] outside a flow.
    pub fn try_current(&self) -> Result<FlowContext, ContextError> {
        self.current_context().ok_or(ContextError::NoActiveFlow)
    }

    /// Identifier of the current flow.
    #[must_use]
    pub fn flow_id(&self) -> Option<String> {
        FlowHandle::current().map(|h| h.flow_id())
    }

    /// Looks up `key` in the current context.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        FlowHandle::current().and_then(|h| {
            let ctx = h.cell.context.lock();
            ctx.get(key)
        })
    }

    /// Looks up `key` and deserializes it into `T`. Returns `None` when the
    /// value is absent or has a different shape.
    #[must_use]
    pub fn get_as<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        self.get(key).and_then(|v| serde_json::from_value(v).ok())
    }

    /// Inserts or overwrites `key` in the current context.
    ///
    /// Returns `false`, without mutating anything, when no flow is bound or
    /// the value is rejected (see [`try_set`](Self::try_set)).
    pub fn set<V>(&self, key: &str, value: V) -> bool
    where
        V: Serialize,
    {
        match self.try_set(key, value) {
            Ok(()) => true,
            Err(e) => {
                trace!(key, error = %e, "context value not set");
                false
            }
        }
    }

    /// Fallible form of [`set`](Self::set).
    ///
    /// # Errors
    ///
    /// - [`ContextError::NoActiveFlow`] outside a flow.
    /// - [`ContextError::Serialize`] if `value` cannot be turned into JSON.
    /// - [`ContextError::TypeMismatch`] for a typed or reserved key given a
    ///   value of the wrong shape.
    pub fn try_set<V>(&self, key: &str, value: V) -> Result<(), ContextError>
    where
        V: Serialize,
    {
        let handle = FlowHandle::current().ok_or(ContextError::NoActiveFlow)?;
        let value = serde_json::to_value(value).map_err(|source| ContextError::Serialize {
            key: key.to_string(),
            source,
        })?;
        let mut ctx = handle.cell.context.lock();
        ctx.insert(key, value)
    }

    /// Runs `f` against the current context in place.
    ///
    /// The context stays locked while `f` runs, so `f` must not call back
    /// into the store.
    pub fn with_current<R>(&self, f: impl FnOnce(&mut FlowContext) -> R) -> Option<R> {
        FlowHandle::current().map(|h| {
            let mut ctx = h.cell.context.lock();
            f(&mut ctx)
        })
    }

    /// Stores an opaque handle in the current context.
    pub fn set_handle<T>(&self, key: &str, handle: Arc<T>) -> bool
    where
        T: std::any::Any + Send + Sync,
    {
        self.with_current(|ctx| ctx.insert_handle(key, handle))
            .is_some()
    }

    /// Fetches an opaque handle of type `T` from the current context.
    #[must_use]
    pub fn handle<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: std::any::Any + Send + Sync,
    {
        self.with_current(|ctx| ctx.handle::<T>(key)).flatten()
    }

    /// Registers `hook` to run once when the current flow is completed.
    ///
    /// The hook belongs to the innermost binding. Inside a nested
    /// [`run_with_context`](Self::run_with_context) it is attached to the
    /// nested flow, and runs only if something calls [`complete`](Self::complete)
    /// within that nested flow; the entry adapter completes the outer one.
    ///
    /// Returns `false` outside a flow, or when the flow has already completed.
    pub fn on_complete(&self, hook: impl FnOnce(&FlowContext) + Send + 'static) -> bool {
        let Some(handle) = FlowHandle::current() else {
            return false;
        };
        let mut hooks = handle.cell.hooks.lock();
        if handle.cell.completed.load(Ordering::Acquire) {
            return false;
        }
        hooks.push(Box::new(hook));
        true
    }

    /// Completes the current flow: runs and drains its hooks in registration
    /// order with the flow still bound. Only the first call per flow runs
    /// anything. Each hook gets a fresh snapshot, so values set by one hook
    /// are seen by the hooks after it.
    ///
    /// Returns the number of hooks that ran.
    pub fn complete(&self) -> usize {
        let Some(handle) = FlowHandle::current() else {
            return 0;
        };
        let hooks = {
            let mut hooks = handle.cell.hooks.lock();
            if handle.cell.completed.swap(true, Ordering::AcqRel) {
                return 0;
            }
            std::mem::take(&mut *hooks)
        };

        let count = hooks.len();
        for hook in hooks {
            hook(&handle.snapshot());
        }
        debug!(flow_id = %handle.flow_id(), hooks = count, "flow completed");
        count
    }

    /// Binds `context` for the whole extent of `fut` and returns its output
    /// unchanged. The binding ends when `fut` completes or is dropped, and
    /// any outer binding is current again.
    pub fn run_with_context<F>(
        &self,
        context: FlowContext,
        fut: F,
    ) -> impl Future<Output = F::Output>
    where
        F: Future,
    {
        trace!(flow_id = %context.flow_id, "binding flow");
        let guard = self.enter();
        let scoped = FlowHandle::new(context).scope(fut);
        async move {
            let _guard = guard;
            scoped.await
        }
    }

    /// Binds `context` while the synchronous callback `f` runs.
    ///
    /// Works without a runtime. A panic in `f` still releases the binding.
    pub fn run_with_context_sync<R>(&self, context: FlowContext, f: impl FnOnce() -> R) -> R {
        trace!(flow_id = %context.flow_id, "binding flow");
        let _guard = self.enter();
        FlowHandle::new(context).sync_scope(f)
    }

    /// Produces a fresh flow identifier. See [`crate::generate_flow_id`].
    #[must_use]
    pub fn generate_flow_id(&self) -> String {
        crate::flow_id::generate_flow_id()
    }

    /// Number of bindings currently in progress.
    #[must_use]
    pub fn active_flows(&self) -> u64 {
        self.stats.active.load(Ordering::Relaxed)
    }

    /// Number of bindings ever started through this store.
    #[must_use]
    pub fn total_flows(&self) -> u64 {
        self.stats.total.load(Ordering::Relaxed)
    }

    fn enter(&self) -> ActiveFlowGuard {
        self.stats.active.fetch_add(1, Ordering::Relaxed);
        self.stats.total.fetch_add(1, Ordering::Relaxed);
        ActiveFlowGuard {
            stats: Arc::clone(&self.stats),
        }
    }
}

/// Decrements the active-flow counter on drop, including during unwinding.
struct ActiveFlowGuard {
    stats: Arc<FlowStats>,
}

impl Drop for ActiveFlowGuard {
    fn drop(&mut self) {
        self.stats.active.fetch_sub(1, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
