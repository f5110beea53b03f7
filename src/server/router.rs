use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::server::handlers;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/documents",
            get(handlers::list_documents).post(handlers::add_document),
        )
        .route("/documents/:id", delete(handlers::delete_document))
        .route("/search", post(handlers::search))
        .route("/generate", post(handlers::generate))
        .route("/generate/cancel", post(handlers::cancel_generation))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
