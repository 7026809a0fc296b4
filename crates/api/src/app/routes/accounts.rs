use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};

use billflow_core::AccountId;
use billflow_infra::completion::CallContext;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_account))
        .route("/:id", get(get_account))
        .route("/:id/tags", put(replace_tags))
        .route("/:id/timeline", get(timeline))
}

pub async fn create_account(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<CallContext>,
    Json(body): Json<dto::CreateAccountRequest>,
) -> axum::response::Response {
    match services.create_account(&ctx, body.into()) {
        Ok(account) => (StatusCode::CREATED, Json(dto::account_to_json(&account))).into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn get_account(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: AccountId = match dto::parse_id(&id, "account") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.account(id) {
        Ok(account) => (StatusCode::OK, Json(dto::account_to_json(&account))).into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn replace_tags(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<CallContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ReplaceTagsRequest>,
) -> axum::response::Response {
    let id: AccountId = match dto::parse_id(&id, "account") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.replace_control_tags(&ctx, id, body.tag_set()) {
        Ok(account) => (StatusCode::OK, Json(dto::account_to_json(&account))).into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

/// Everything known about an account, read from all sources at once.
pub async fn timeline(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<CallContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: AccountId = match dto::parse_id(&id, "account") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let result = services.timeline(id, ctx.interrupt()).await;
    errors::fetch_to_response(result, |view| (StatusCode::OK, Json(view)).into_response())
}
