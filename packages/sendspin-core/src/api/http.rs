//! HTTP route handlers.
//!
//! Thin handlers; the WebSocket upgrade at `config.ws_path` does the real
//! work via [`crate::session::Session`].

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::api::ws::ws_handler;
use crate::api::AppState;
use crate::protocol_constants::SERVICE_ID;

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let ws_path = state.config.ws_path.clone();
    Router::new()
        .route("/health", get(health_check))
        .route(&ws_path, get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness probe: reports the service is up and how many sessions are live.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": SERVICE_ID,
        "sessions": state.registry.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{TaskSpawner, TokioSpawner};
    use crate::state::Config;
    use std::sync::Arc;

    fn test_state() -> AppState {
        AppState::builder()
            .config(Arc::new(Config::default()))
            .registry(Arc::new(crate::registry::SessionRegistry::new()))
            .ws_manager(Arc::new(crate::api::WsConnectionManager::new()))
            .spawner(Arc::new(TokioSpawner::current()) as Arc<dyn TaskSpawner>)
            .build()
    }

    #[tokio::test]
    async fn health_check_reports_zero_sessions() {
        let state = test_state();
        let response = health_check(State(state)).await.into_response();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
