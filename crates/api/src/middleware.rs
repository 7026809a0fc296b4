use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use billflow_core::CorrelationToken;
use billflow_infra::completion::CallContext;

pub const REQUEST_ID: &str = "x-request-id";
pub const CREATED_BY: &str = "x-created-by";
pub const REASON: &str = "x-reason";
pub const COMMENT: &str = "x-comment";

#[derive(Clone)]
pub struct ContextState {
    /// Parent of every request's interrupt signal.
    pub shutdown: CancellationToken,
}

/// Attach a [`CallContext`] to every request.
///
/// The correlation token comes from `X-Request-Id` when it holds a UUID, and
/// is generated otherwise; it is echoed back on the response.
pub async fn call_context_middleware(
    State(state): State<ContextState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let headers = req.headers();
    let token = match header(headers, REQUEST_ID) {
        Some(raw) => raw.parse::<CorrelationToken>().map_err(|_| StatusCode::BAD_REQUEST)?,
        None => CorrelationToken::new(),
    };

    let ctx = CallContext::new(token)
        .with_audit(header(headers, CREATED_BY), header(headers, REASON), header(headers, COMMENT))
        .with_interrupt(state.shutdown.child_token());
    req.extensions_mut().insert(ctx);

    let span = tracing::info_span!("request", token = %token, method = %req.method(), path = %req.uri().path());
    let mut res = next.run(req).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&token.to_string()) {
        res.headers_mut().insert(REQUEST_ID, value);
    }
    Ok(res)
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
