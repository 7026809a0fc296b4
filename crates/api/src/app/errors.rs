use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use billflow_core::DomainError;
use billflow_infra::completion::{CompletionError, CompletionOutcome, RegistryError};
use billflow_infra::fetch::{FetchError, FetchOutcome};

pub fn domain_error_to_response(err: DomainError) -> Response {
    match err {
        DomainError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DomainError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        DomainError::InvalidId(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_id", msg),
        DomainError::NotFound(what) => json_error(StatusCode::NOT_FOUND, "not_found", format!("not found: {what}")),
        DomainError::Catalog(msg) => json_error(StatusCode::BAD_REQUEST, "catalog_error", msg),
    }
}

pub fn completion_error_to_response(err: CompletionError) -> Response {
    match err {
        CompletionError::Domain(e) => domain_error_to_response(e),
        CompletionError::Catalog(msg) => json_error(StatusCode::BAD_REQUEST, "catalog_error", msg),
        CompletionError::MissingAccount => json_error(
            StatusCode::BAD_REQUEST,
            "missing_account",
            "call completion requires an account",
        ),
        CompletionError::Registry(RegistryError::AlreadyRegistered(token)) => json_error(
            StatusCode::CONFLICT,
            "duplicate_request",
            format!("request {token} is already in flight"),
        ),
    }
}

/// Map a synchronized call to its HTTP response; `ok` renders the success value.
pub fn completion_to_response<R>(
    result: Result<CompletionOutcome<R>, CompletionError>,
    ok: impl FnOnce(R) -> Response,
) -> Response {
    match result {
        Ok(CompletionOutcome::Completed(value)) => ok(value),
        Ok(CompletionOutcome::Unconfirmed) => json_error(
            StatusCode::REQUEST_TIMEOUT,
            "completion_timeout",
            "the request was accepted but its billing effects were not confirmed in time",
        ),
        Ok(CompletionOutcome::Interrupted) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "interrupted",
            "interrupted while waiting for completion",
        ),
        Err(err) => completion_error_to_response(err),
    }
}

pub fn fetch_to_response<T>(
    result: Result<FetchOutcome<T>, FetchError<DomainError>>,
    ok: impl FnOnce(std::collections::BTreeMap<String, T>) -> Response,
) -> Response {
    match result {
        Ok(FetchOutcome::Complete(values)) => ok(values),
        Ok(FetchOutcome::Unavailable { missing }) => (
            StatusCode::SERVICE_UNAVAILABLE,
            axum::Json(json!({
                "error": "fetch_deadline",
                "message": "not every source answered before the deadline",
                "missing": missing,
            })),
        )
            .into_response(),
        Err(FetchError::Source { error, .. }) => domain_error_to_response(error),
        Err(err @ (FetchError::Crashed { .. } | FetchError::Interrupted | FetchError::DuplicateName(_))) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "fetch_failed", err.to_string())
        }
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
