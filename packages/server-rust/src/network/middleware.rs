//! HTTP middleware stack for the `flowctx` server.
//!
//! Builds the Tower middleware pipeline applied to all HTTP requests.
//! Middleware ordering follows the outer-to-inner convention: the first
//! layer listed is the outermost (processes the request first on the way
//! in, and the response last on the way out).

use axum::http::{Method, Request, StatusCode};
use flowctx_core::ContextStore;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{MakeSpan, TraceLayer};
use tracing::Span;

use super::config::NetworkConfig;
use super::flow_context::FlowContextLayer;

/// The composed Tower layer type produced by [`build_http_layers`].
///
/// Each layer wraps the next in a `Stack`, from outermost (first applied) to
/// innermost (last applied).
type HttpLayers = tower::layer::util::Stack<
    TimeoutLayer,
    tower::layer::util::Stack<
        CorsLayer,
        tower::layer::util::Stack<
            CompressionLayer,
            tower::layer::util::Stack<
                TraceLayer<
                    tower_http::classify::SharedClassifier<
                        tower_http::classify::ServerErrorsAsFailures,
                    >,
                    FlowSpan,
                >,
                tower::layer::util::Stack<FlowContextLayer, tower::layer::util::Identity>,
            >,
        >,
    >,
>;

/// Builds the HTTP-level Tower middleware stack from the network configuration.
///
/// **Middleware ordering (outermost to innermost):**
/// 1. `FlowContext` -- binds a new flow (id, start time, route, method) and
///    writes the correlation header on the way out
/// 2. `Tracing` -- request/response spans tagged with the flow id
/// 3. `Compression` -- gzip response compression
/// 4. `CORS` -- Cross-Origin Resource Sharing based on configured origins
/// 5. `Timeout` -- enforces a maximum request processing duration
#[must_use]
pub fn build_http_layers(config: &NetworkConfig, store: &ContextStore) -> HttpLayers {
    let cors = build_cors_layer(&config.cors_origins);

    ServiceBuilder::new()
        .layer(FlowContextLayer::new(store.clone(), config.flow.clone()))
        .layer(TraceLayer::new_for_http().make_span_with(FlowSpan::new(store.clone())))
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .into_inner()
}

/// Builds the CORS layer from the configured list of allowed origins.
///
/// A wildcard `"*"` in the origins list allows any origin. Otherwise,
/// each origin string is parsed and added to an explicit allowlist.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

/// Span factory for `TraceLayer` that records the current flow id.
///
/// Runs inside the flow because `FlowContextLayer` sits outside the trace
/// layer.
#[derive(Debug, Clone)]
pub struct FlowSpan {
    store: ContextStore,
}

impl FlowSpan {
    #[must_use]
    pub fn new(store: ContextStore) -> Self {
        Self { store }
    }
}

impl<B> MakeSpan<B> for FlowSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let flow_id = self.store.flow_id().unwrap_or_default();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            flow_id = %flow_id,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::extract::State;
    use axum::routing::get;
    use axum::Router;
    use flowctx_core::FlowContext;
    use tower::ServiceExt;

    use super::*;

    #[test]
    fn build_http_layers_does_not_panic_with_defaults() {
        let config = NetworkConfig::default();
        let _layers = build_http_layers(&config, &ContextStore::new());
    }

    #[test]
    fn build_cors_layer_wildcard() {
        let origins = vec!["*".to_string()];
        let _cors = build_cors_layer(&origins);
    }

    #[test]
    fn build_cors_layer_specific_origins() {
        let origins = vec![
            "http://localhost:3000".to_string(),
            "https://example.com".to_string(),
        ];
        let _cors = build_cors_layer(&origins);
    }

    #[test]
    fn flow_span_outside_a_flow_is_still_created() {
        let mut make = FlowSpan::new(ContextStore::new());
        let request = Request::builder().uri("/x").body(()).unwrap();
        let _span = make.make_span(&request);
    }

    #[test]
    fn flow_span_reads_the_bound_flow() {
        let store = ContextStore::new();
        let mut make = FlowSpan::new(store.clone());
        let request = Request::builder().uri("/x").body(()).unwrap();
        store.run_with_context_sync(FlowContext::new("span-flow"), || {
            let _span = make.make_span(&request);
            assert_eq!(store.flow_id().as_deref(), Some("span-flow"));
        });
    }

    #[tokio::test]
    async fn full_stack_binds_flow_and_sets_header() {
        let store = ContextStore::new();
        let router = Router::new()
            .route(
                "/",
                get(|State(store): State<ContextStore>| async move {
                    store.flow_id().unwrap_or_default()
                }),
            )
            .with_state(store.clone())
            .layer(build_http_layers(&NetworkConfig::default(), &store));

        let request = Request::builder()
            .uri("/")
            .header("x-request-id", "stack-1")
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.headers()["x-request-id"], "stack-1");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"stack-1");
    }

    #[tokio::test]
    async fn timeout_still_yields_correlated_response() {
        let store = ContextStore::new();
        let config = NetworkConfig {
            request_timeout: Duration::from_millis(20),
            ..NetworkConfig::default()
        };
        let router = Router::new()
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    "late"
                }),
            )
            .layer(build_http_layers(&config, &store));

        let request = Request::builder().uri("/slow").body(Body::empty()).unwrap();
        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert!(response.headers().contains_key("x-request-id"));
    }
}
