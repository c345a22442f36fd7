//! API Routes
//!
//! Configures the Axum router with the cache admin endpoints and the
//! caching proxy.

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    clear_handler, delete_handler, delete_prefix_handler, get_handler, health_handler,
    proxy_read_handler, proxy_write_handler, set_handler, stats_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `GET /health` - Health check endpoint
/// - `GET /stats` - Cache statistics
/// - `PUT /entries` - Store a JSON value
/// - `GET /entries/:key` - Retrieve a value by key
/// - `DELETE /entries/:key` - Delete a key
/// - `DELETE /prefix/:prefix` - Delete every key with a prefix
/// - `POST /clear` - Empty the cache
/// - `GET /api/*path` - Cached read from upstream
/// - `POST|PUT|PATCH|DELETE /api/*path` - Forwarded write, invalidates the resource
///
/// # Middleware
/// - CORS: Allows any origin (configurable for production)
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/entries", put(set_handler))
        .route("/entries/:key", get(get_handler).delete(delete_handler))
        .route("/prefix/:prefix", delete(delete_prefix_handler))
        .route("/clear", post(clear_handler))
        .route(
            "/api/*path",
            get(proxy_read_handler)
                .post(proxy_write_handler)
                .put(proxy_write_handler)
                .patch(proxy_write_handler)
                .delete(proxy_write_handler),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
