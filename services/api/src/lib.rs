pub mod config;
pub mod connection;
pub mod state;
pub mod ws;

use axum::{Json, Router, extract::State, http::HeaderValue, routing::get};
use interview_types::now_timestamp;
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::cors::{Any, AllowOrigin, CorsLayer};

use crate::state::AppState;

/// Restricts cross-origin requests to `origins`. A `*` entry allows any origin.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match origin.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

pub fn router(state: Arc<AppState>, cors: CorsLayer) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/ws/{session_id}", get(ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "message": "Virtual AI Interview Room API",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": now_timestamp(),
        "activeSessions": state.store.len(),
        "activeConnections": state.connections.len(),
    }))
}
