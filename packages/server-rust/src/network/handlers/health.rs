//! Health and liveness endpoint handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use super::AppState;

/// Returns flow statistics and uptime as JSON.
///
/// When served behind the flow layer the probe is itself a flow, so
/// `active_flows` is at least 1 and `flow_id` is the probe's own id.
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "active_flows": state.store.active_flows(),
        "total_flows": state.store.total_flows(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "flow_id": state.store.flow_id(),
    }))
}

/// Liveness probe -- always returns 200 OK.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowctx_core::{ContextStore, FlowContext};
    use std::time::Instant;

    fn test_state() -> AppState {
        AppState {
            store: ContextStore::new(),
            start_time: Instant::now(),
        }
    }

    #[tokio::test]
    async fn health_handler_returns_json_with_all_fields() {
        let response = health_handler(State(test_state())).await;
        let json = response.0;

        assert_eq!(json["active_flows"], 0);
        assert_eq!(json["total_flows"], 0);
        assert!(json["uptime_secs"].is_number());
        assert!(json["flow_id"].is_null());
    }

    #[tokio::test]
    async fn health_handler_reports_the_surrounding_flow() {
        let state = test_state();
        let store = state.store.clone();

        let response = store
            .run_with_context(FlowContext::new("probe-1"), health_handler(State(state)))
            .await;

        assert_eq!(response.0["active_flows"], 1);
        assert_eq!(response.0["total_flows"], 1);
        assert_eq!(response.0["flow_id"], "probe-1");
    }

    #[tokio::test]
    async fn liveness_handler_always_returns_200() {
        assert_eq!(liveness_handler().await, StatusCode::OK);
    }
}
