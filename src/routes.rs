use axum::{routing::get, Router};

use crate::handlers;
use crate::listing::VIEW_PLAIN_ROUTE;
use crate::AppState;

/// Create file server routes
pub fn file_routes() -> Router<AppState> {
    Router::new()
        // Raw plain-text view, outside the served tree
        .route(VIEW_PLAIN_ROUTE, get(handlers::view_plain))
        // Served tree
        .route("/", get(handlers::serve_path))
        .route("/*path", get(handlers::serve_path))
}
