//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: ledger, catalog and notification sink wiring
//! - `routes/`: HTTP routes + handlers (one file per ledger area)
//! - `dto.rs`: request DTOs and JSON mapping helpers
//! - `errors.rs`: ledger errors as consistent JSON responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{AppServices, SharedStore};

/// Build the full HTTP router (public entrypoint used by `main.rs` and tests).
pub fn build_app(services: Arc<AppServices>) -> Router {
    // Ledger routes: require an acting operator.
    let protected = routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn(middleware::actor_middleware));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new())
}
