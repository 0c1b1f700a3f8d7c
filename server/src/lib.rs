//! Import Server - HTTP driver for interactive record imports.
//!
//! Clients upload a CSV document, then answer the strategy and per-row
//! questions the importer-engine session asks, one request per answer.

mod auth;
pub mod config;
pub mod error;
mod handlers;
mod routes;
pub mod sessions;
pub mod store;

pub use crate::config::{Config, ConfigError};
pub use crate::sessions::SessionManager;
pub use crate::store::RestStore;

use axum::Router;
use importer_engine::RecordStore;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub config: Arc<Config>,
    pub sessions: Arc<SessionManager>,
}

impl AppState {
    pub fn new(store: Arc<dyn RecordStore>, config: Config) -> Self {
        Self {
            store,
            config: Arc::new(config),
            sessions: SessionManager::new_shared(),
        }
    }
}

/// Build the application router with its middleware.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
