//! Flow entry adapter for HTTP services.
//!
//! [`FlowContextLayer`] turns every request into a logical flow: it builds a
//! fresh [`FlowContext`] (flow id from the inbound correlation header or
//! generated, start time, path, method), runs the inner service bound to it,
//! and when the response is ready records `requestDuration`, runs the flow's
//! completion hooks and writes the flow id to the outbound correlation header.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, Uri, Version};
use flowctx_core::{accept_external_id, keys, ContextStore, FlowContext};
use parking_lot::Mutex;
use tower::{Layer, Service};
use tracing::{debug, info, warn};

use super::config::FlowContextConfig;

// ---------------------------------------------------------------------------
// Raw transport handles
// ---------------------------------------------------------------------------

/// Snapshot of the inbound request head, stored under [`keys::REQUEST_HANDLE`]
/// when raw handles are enabled.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
}

impl RequestHead {
    fn from_request<B>(req: &Request<B>) -> Self {
        Self {
            method: req.method().clone(),
            uri: req.uri().clone(),
            version: req.version(),
            headers: req.headers().clone(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        self.uri.path()
    }
}

/// Outbound side of the flow, stored under [`keys::RESPONSE_HANDLE`] when raw
/// handles are enabled. Headers added here are copied onto the response when
/// the flow completes, overriding same-named headers set by the handler.
#[derive(Debug, Default)]
pub struct ResponseHandle {
    headers: Mutex<HeaderMap>,
}

impl ResponseHandle {
    pub fn insert_header(&self, name: HeaderName, value: HeaderValue) {
        self.headers.lock().insert(name, value);
    }

    /// Headers queued so far.
    #[must_use]
    pub fn pending_headers(&self) -> HeaderMap {
        self.headers.lock().clone()
    }

    fn take_headers(&self) -> HeaderMap {
        std::mem::take(&mut *self.headers.lock())
    }
}

// ---------------------------------------------------------------------------
// FlowContextLayer
// ---------------------------------------------------------------------------

/// Tower layer that binds a new flow context to every request.
#[derive(Debug, Clone)]
pub struct FlowContextLayer {
    store: ContextStore,
    config: Arc<FlowContextConfig>,
}

impl FlowContextLayer {
    #[must_use]
    pub fn new(store: ContextStore, config: FlowContextConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
        }
    }
}

impl<S> Layer<S> for FlowContextLayer {
    type Service = FlowContextService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        FlowContextService {
            inner,
            store: self.store.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

// ---------------------------------------------------------------------------
// FlowContextService
// ---------------------------------------------------------------------------

/// Service wrapper that runs the inner service inside a per-request flow.
#[derive(Debug, Clone)]
pub struct FlowContextService<S> {
    inner: S,
    store: ContextStore,
    config: Arc<FlowContextConfig>,
}

impl<S> FlowContextService<S> {
    /// Builds the context for a new request. Also returns the response handle
    /// when raw handles are enabled, so the outbound headers can be applied.
    fn entry_context<B>(&self, req: &Request<B>) -> (FlowContext, Option<Arc<ResponseHandle>>) {
        let inbound = req
            .headers()
            .get(&self.config.request_header)
            .map(|value| value.to_str().ok().and_then(accept_external_id));

        let flow_id = match inbound {
            Some(Some(id)) => id.to_string(),
            Some(None) => {
                debug!(
                    header = %self.config.request_header,
                    "ignoring unusable inbound correlation id"
                );
                self.store.generate_flow_id()
            }
            None => self.store.generate_flow_id(),
        };

        let mut context = FlowContext::new(flow_id)
            .with_route(req.uri().path())
            .with_method(req.method().as_str());

        if !self.config.include_raw_handles {
            return (context, None);
        }

        let response = Arc::new(ResponseHandle::default());
        context.insert_handle(keys::REQUEST_HANDLE, Arc::new(RequestHead::from_request(req)));
        context.insert_handle(keys::RESPONSE_HANDLE, Arc::clone(&response));
        (context, Some(response))
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for FlowContextService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // Only the instance polled by `poll_ready` is guaranteed ready.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let (context, response_handle) = self.entry_context(&req);
        let store = self.store.clone();
        let response_header = self.config.response_header.clone();

        Box::pin(self.store.run_with_context(context, async move {
            let result = inner.call(req).await;

            let duration_ms = store.with_current(|ctx| ctx.elapsed_ms()).unwrap_or_default();
            store.set(keys::REQUEST_DURATION, duration_ms);
            store.complete();

            let flow_id = store.flow_id().unwrap_or_default();
            match result {
                Ok(mut response) => {
                    if let Some(handle) = response_handle {
                        response.headers_mut().extend(handle.take_headers());
                    }
                    match HeaderValue::from_str(&flow_id) {
                        Ok(value) => {
                            response.headers_mut().insert(response_header, value);
                        }
                        Err(e) => {
                            warn!(%flow_id, error = %e, "flow id is not a valid header value");
                        }
                    }
                    info!(
                        %flow_id,
                        status = response.status().as_u16(),
                        duration_ms,
                        "flow complete"
                    );
                    Ok(response)
                }
                Err(e) => {
                    warn!(%flow_id, duration_ms, "flow failed in downstream service");
                    Err(e)
                }
            }
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
