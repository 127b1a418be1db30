//! Error types for the context store.

/// Errors surfaced by the fallible (`try_*`) context store operations.
///
/// The infallible operations (`get`, `set`, `current_context`) fold these into
/// `None` / `false` so that code running both inside and outside a flow stays
/// safe to call.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("no flow context is bound to the current task")]
    NoActiveFlow,
    #[error("value for `{key}` must be {expected}")]
    TypeMismatch { key: String, expected: &'static str },
    #[error("value for `{key}` could not be serialized: {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}
