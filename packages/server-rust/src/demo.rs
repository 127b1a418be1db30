//! Demo application served by `demo-server`.
//!
//! Shows the context store from the application side: a logging middleware
//! that correlates start and completion lines by flow id, a route that stores
//! user data in the flow and reads it back from plain business logic, and a
//! failing route whose error response is still correlated.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use flowctx_core::ContextStore;
use serde_json::{json, Value};
use tracing::{error, info};

/// Context key for the status code recorded by [`request_logger`].
pub const STATUS_CODE_KEY: &str = "statusCode";

/// Builds the demo routes:
/// - `GET /api/users` -- stores `userId`/`userRole` in the flow
/// - `GET /api/error` -- fails with a correlated 500 response
pub fn demo_routes(store: ContextStore) -> Router {
    Router::new()
        .route("/api/users", get(users_handler))
        .route("/api/error", get(error_handler))
        .layer(middleware::from_fn_with_state(store.clone(), request_logger))
        .with_state(store)
}

/// Logs request start, and request completion (with duration and status)
/// from a completion hook.
pub async fn request_logger(
    State(store): State<ContextStore>,
    req: Request,
    next: Next,
) -> Response {
    let flow_id = store.flow_id().unwrap_or_default();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    info!(%flow_id, %method, %path, "Request started");

    store.on_complete(move |ctx| {
        let duration_ms = ctx.duration_ms.unwrap_or_default();
        let status = ctx.get(STATUS_CODE_KEY).unwrap_or(Value::Null);
        info!(
            flow_id = %ctx.flow_id,
            %method,
            %path,
            duration_ms,
            %status,
            "Request completed"
        );
    });

    let response = next.run(req).await;
    store.set(STATUS_CODE_KEY, response.status().as_u16());
    response
}

async fn users_handler(State(store): State<ContextStore>) -> Json<Value> {
    store.set("userId", "12345");
    store.set("userRole", "admin");

    process_user_request(&store);

    Json(json!({
        "message": "User data processed successfully",
        "flowId": store.flow_id(),
    }))
}

/// Business logic that reads the flow without receiving it as an argument.
fn process_user_request(store: &ContextStore) {
    let flow_id = store.flow_id().unwrap_or_default();
    let user_id = store.get_as::<String>("userId").unwrap_or_default();
    let user_role = store.get_as::<String>("userRole").unwrap_or_default();

    info!(%flow_id, %user_id, %user_role, "Processing request for user");
}

async fn error_handler(State(store): State<ContextStore>) -> Result<Json<Value>, AppError> {
    store.set("errorType", "Simulated error");
    Err(AppError::in_flow(&store, "Something went wrong"))
}

/// Application error carrying the flow's correlation data into the response.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct AppError {
    message: String,
    flow_id: Option<String>,
    error_type: String,
}

impl AppError {
    /// Captures the current flow id and `errorType` from the store.
    pub fn in_flow(store: &ContextStore, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            flow_id: store.flow_id(),
            error_type: store
                .get_as::<String>("errorType")
                .unwrap_or_else(|| "Unknown".to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!(
            flow_id = self.flow_id.as_deref().unwrap_or_default(),
            error_type = %self.error_type,
            "Error: {}",
            self.message
        );
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": self.message,
                "requestId": self.flow_id,
                "errorType": self.error_type,
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use flowctx_core::FlowContext;
    use parking_lot::Mutex;
    use tower::ServiceExt;

    use super::*;
    use crate::network::{NetworkConfig, NetworkModule};

    async fn call(router: Router, uri: &str) -> (StatusCode, String, Value) {
        let request = axum::http::Request::builder()
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let header = response.headers()["x-request-id"]
            .to_str()
            .unwrap()
            .to_string();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, header, serde_json::from_slice(&bytes).unwrap())
    }

    fn served() -> (ContextStore, Router) {
        let module = NetworkModule::new(NetworkConfig::default());
        let store = module.store();
        let router = module.build_router(demo_routes(store.clone()));
        (store, router)
    }

    #[tokio::test]
    async fn users_route_is_correlated_end_to_end() {
        let (_store, router) = served();
        let (status, header, body) = call(router, "/api/users").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["flowId"], header.as_str());
        assert_eq!(body["message"], "User data processed successfully");
    }

    #[tokio::test]
    async fn error_route_reports_flow_and_error_type() {
        let (_store, router) = served();
        let (status, header, body) = call(router, "/api/error").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["requestId"], header.as_str());
        assert_eq!(body["errorType"], "Simulated error");
        assert_eq!(body["error"], "Something went wrong");
    }

    #[tokio::test]
    async fn logger_hook_sees_duration_status_and_user_data() {
        let store = ContextStore::new();
        let captured: Arc<Mutex<Option<FlowContext>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&captured);
        let hook_store = store.clone();

        let router = demo_routes(store.clone())
            .layer(middleware::from_fn(move |req: Request, next: Next| {
                let slot = Arc::clone(&slot);
                let store = hook_store.clone();
                async move {
                    store.on_complete(move |ctx| *slot.lock() = Some(ctx.clone()));
                    next.run(req).await
                }
            }))
            .layer(crate::network::FlowContextLayer::new(
                store.clone(),
                crate::network::FlowContextConfig::default(),
            ));

        let (status, _header, _body) = call(router, "/api/users").await;
        assert_eq!(status, StatusCode::OK);

        let done = captured.lock().clone().expect("completion hook ran");
        assert_eq!(done.get("userId"), Some(json!("12345")));
        assert_eq!(done.get("userRole"), Some(json!("admin")));
        assert_eq!(done.get(STATUS_CODE_KEY), Some(json!(200)));
        assert!(done.duration_ms.is_some());
    }

    #[test]
    fn app_error_outside_a_flow_uses_defaults() {
        let err = AppError::in_flow(&ContextStore::new(), "boom");
        assert_eq!(err.to_string(), "boom");
        assert!(err.flow_id.is_none());
        assert_eq!(err.error_type, "Unknown");
    }
}
