use crate::state::AppState;
use crate::watcher::ViewportWatcher;
use axum::Router;
use axum::routing::{get, post};
use std::sync::{Arc, RwLock};

pub mod handlers;
pub mod responses;

#[derive(Debug, Clone)]
pub struct ApiState {
    pub state: Arc<RwLock<AppState>>,
    pub watcher: ViewportWatcher,
}

pub fn router(state: Arc<RwLock<AppState>>, watcher: ViewportWatcher) -> Router {
    Router::new()
        .route("/api/viewport", post(handlers::post_viewport))
        .route("/api/traffic/refresh", post(handlers::post_refresh))
        .route("/api/traffic/status", get(handlers::get_status))
        .route("/api/traffic/legend", get(handlers::get_legend))
        .route("/api/traffic/segments", post(handlers::post_segments))
        .route("/api/health", get(handlers::get_health))
        .with_state(ApiState { state, watcher })
}
