use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use billflow_core::{AccountId, SubscriptionId};
use billflow_infra::completion::CallContext;

use crate::app::dto::{self, CompletionParams};
use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_subscription))
        .route(
            "/:id",
            get(get_subscription).put(change_plan).delete(cancel_subscription),
        )
}

/// `POST /subscriptions`. Creation always takes effect today.
pub async fn create_subscription(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<CallContext>,
    Query(params): Query<CompletionParams>,
    Json(body): Json<dto::CreateSubscriptionRequest>,
) -> axum::response::Response {
    let account_id: AccountId = match dto::parse_id(&body.account_id, "account") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let ctx = ctx.with_account(account_id);

    let svc = services.clone();
    let plan_name = body.plan_name;
    let result = services
        .coordinator()
        .with_synchronization(
            move |ctx: CallContext| async move {
                svc.create_subscription(&ctx, account_id, &plan_name).await
            },
            params.timeout_secs(dto::DEFAULT_CALL_TIMEOUT_SECS),
            params.call_completion,
            &ctx,
            |sub| dto::subscription_to_json(&sub),
        )
        .await;

    errors::completion_to_response(result, |json| (StatusCode::CREATED, Json(json)).into_response())
}

pub async fn get_subscription(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: SubscriptionId = match dto::parse_id(&id, "subscription") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.subscription(id) {
        Ok(sub) => (StatusCode::OK, Json(dto::subscription_to_json(&sub))).into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

/// `PUT /subscriptions/:id`. Changes plan now, or on `requestedDate`.
pub async fn change_plan(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<CallContext>,
    Path(id): Path<String>,
    Query(params): Query<CompletionParams>,
    Json(body): Json<dto::ChangePlanRequest>,
) -> axum::response::Response {
    let id: SubscriptionId = match dto::parse_id(&id, "subscription") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let ctx = match services.subscription(id) {
        Ok(sub) => ctx.with_account(sub.account_id),
        Err(e) => return errors::domain_error_to_response(e),
    };

    let svc = services.clone();
    let plan_name = body.plan_name;
    let requested_date = params.requested_date;
    let result = services
        .coordinator()
        .with_synchronization(
            move |ctx: CallContext| async move {
                svc.change_plan(&ctx, id, &plan_name, requested_date).await
            },
            params.timeout_secs(dto::DEFAULT_CALL_TIMEOUT_SECS),
            params.call_completion,
            &ctx,
            |sub| dto::subscription_to_json(&sub),
        )
        .await;

    errors::completion_to_response(result, |json| (StatusCode::OK, Json(json)).into_response())
}

/// `DELETE /subscriptions/:id`. Cancels now, or on `requestedDate`.
pub async fn cancel_subscription(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<CallContext>,
    Path(id): Path<String>,
    Query(params): Query<CompletionParams>,
) -> axum::response::Response {
    let id: SubscriptionId = match dto::parse_id(&id, "subscription") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let ctx = match services.subscription(id) {
        Ok(sub) => ctx.with_account(sub.account_id),
        Err(e) => return errors::domain_error_to_response(e),
    };

    let svc = services.clone();
    let requested_date = params.requested_date;
    let result = services
        .coordinator()
        .with_synchronization(
            move |ctx: CallContext| async move {
                svc.cancel_subscription(&ctx, id, requested_date).await
            },
            params.timeout_secs(dto::DEFAULT_CANCEL_TIMEOUT_SECS),
            params.call_completion,
            &ctx,
            |_sub| (),
        )
        .await;

    errors::completion_to_response(result, |()| StatusCode::NO_CONTENT.into_response())
}
