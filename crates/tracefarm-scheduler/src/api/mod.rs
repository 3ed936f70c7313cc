pub mod rest;
pub mod websocket;

use crate::dispatch::Dispatcher;
use axum::routing::get;
use axum::Router;
use std::path::Path;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracefarm_persistence::SceneStore;

/// Shared state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub store: Arc<SceneStore>,
}

/// REST API, worker WebSocket and finished images
pub fn create_router(state: AppState, image_dir: &Path) -> Router {
    rest::routes()
        .route("/ws", get(websocket::ws_handler))
        .nest_service("/images", ServeDir::new(image_dir))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
