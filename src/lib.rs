//! Authenticated static file server.
//!
//! Serves a directory tree over HTTP: files are streamed, directories get a
//! generated HTML index, and `/_special/view_plain` shows any file as text.
//! Every request must pass HTTP Basic authentication first.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod listing;
pub mod paths;
pub mod plain;
pub mod routes;

use std::sync::Arc;

use axum::{middleware, Router};
use tower_http::trace::TraceLayer;

pub use auth::{AuthDecision, Authenticator, Credentials, StaticCredentials};
pub use config::{Config, PortSpec};
pub use error::FileServerError;
pub use paths::ServedRoot;

/// Application state shared across handlers. Fixed at startup.
#[derive(Clone)]
pub struct AppState {
    /// Root directory to serve files from
    pub root: ServedRoot,
    /// Configuration
    pub config: Arc<Config>,
    /// Credential checks applied to every request
    pub auth: Arc<Authenticator>,
}

impl AppState {
    pub fn new(root: ServedRoot, config: Config, auth: Authenticator) -> Self {
        Self {
            root,
            config: Arc::new(config),
            auth: Arc::new(auth),
        }
    }
}

/// Build the full application router with authentication and tracing.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(routes::file_routes())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
