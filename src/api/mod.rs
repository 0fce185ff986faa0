//! API layer - HTTP handlers and routing
//!
//! A small demo application on top of the session store: a visit counter,
//! a logout route that deletes the session, and a health check.

pub mod handlers;
pub mod middleware;

use axum::{middleware as axum_middleware, routing::get, routing::post, Router};
use tower_http::trace::TraceLayer;

pub use middleware::{session_middleware, ApiError, DynSessionStore, Sessions};

/// Cookie name used by the demo routes
pub const SESSION_NAME: &str = "dbsession";

/// Build the demo router
pub fn build_router(store: DynSessionStore) -> Router {
    Router::new()
        .route("/", get(handlers::visit))
        .route("/logout", post(handlers::logout))
        .layer(axum_middleware::from_fn_with_state(store, session_middleware))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
}
