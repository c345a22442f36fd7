//! API Module
//!
//! HTTP handlers and routing for the cache admin API and caching proxy.
//!
//! # Endpoints
//! - `GET /health`, `GET /stats`
//! - `PUT /entries`, `GET /entries/:key`, `DELETE /entries/:key`
//! - `DELETE /prefix/:prefix`, `POST /clear`
//! - `/api/*path` - reads cached through `get_or_set`, writes invalidate

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
