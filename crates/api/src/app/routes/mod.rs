use axum::Router;

pub mod accounts;
pub mod subscriptions;
pub mod system;

/// Router for all billing endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/accounts", accounts::router())
        .nest("/subscriptions", subscriptions::router())
}
