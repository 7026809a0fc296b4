//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: service wiring and the billing operations
//! - `store.rs`: in-memory records and the plan catalog
//! - `pipeline.rs`: simulated invoice/payment stages publishing on the bus
//! - `routes/`: HTTP routes + handlers (one file per resource)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod pipeline;
pub mod routes;
pub mod services;
pub mod store;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<services::AppServices>) -> Router {
    let context_state = middleware::ContextState {
        shutdown: services.shutdown_token().clone(),
    };

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router())
        .layer(
            ServiceBuilder::new()
                .layer(Extension(services))
                .layer(axum::middleware::from_fn_with_state(
                    context_state,
                    middleware::call_context_middleware,
                )),
        )
}
