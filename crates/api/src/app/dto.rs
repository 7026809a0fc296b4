use std::str::FromStr;

use axum::http::StatusCode;
use chrono::NaiveDate;
use serde::Deserialize;

use billflow_core::{ControlTag, ControlTagSet, DomainError};

use crate::app::errors;
use crate::app::services::NewAccount;
use crate::app::store::{Account, Subscription};

/// Default `callTimeoutSec` for create and change-plan.
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 3;
/// Default `callTimeoutSec` for cancellation.
pub const DEFAULT_CANCEL_TIMEOUT_SECS: u64 = 5;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountRequest {
    pub name: String,
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default)]
    pub control_tags: Vec<ControlTag>,
    #[serde(default = "has_payment_method")]
    pub payment_method: bool,
}

fn has_payment_method() -> bool {
    true
}

impl From<CreateAccountRequest> for NewAccount {
    fn from(req: CreateAccountRequest) -> Self {
        NewAccount {
            name: req.name,
            utc_offset_minutes: req.utc_offset_minutes,
            control_tags: req.control_tags.into_iter().collect(),
            payment_method: req.payment_method,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceTagsRequest {
    pub control_tags: Vec<ControlTag>,
}

impl ReplaceTagsRequest {
    pub fn tag_set(&self) -> ControlTagSet {
        self.control_tags.iter().copied().collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubscriptionRequest {
    pub account_id: String,
    pub plan_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePlanRequest {
    pub plan_name: String,
}

/// Query parameters shared by the mutating subscription endpoints.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionParams {
    #[serde(default)]
    pub call_completion: bool,
    pub call_timeout_sec: Option<u64>,
    pub requested_date: Option<NaiveDate>,
}

impl CompletionParams {
    pub fn timeout_secs(&self, default: u64) -> u64 {
        self.call_timeout_sec.unwrap_or(default)
    }
}

pub fn parse_id<T>(raw: &str, what: &str) -> Result<T, axum::response::Response>
where
    T: FromStr<Err = DomainError>,
{
    raw.parse::<T>()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {what} id")))
}

// -------------------------
// JSON mapping helpers
// -------------------------

pub fn account_to_json(a: &Account) -> serde_json::Value {
    serde_json::json!({
        "id": a.id.to_string(),
        "name": a.name,
        "utcOffsetMinutes": a.utc_offset_minutes,
        "controlTags": a.control_tags.tags().iter().map(|t| t.as_str()).collect::<Vec<_>>(),
        "paymentMethod": a.payment_method,
        "createdAt": a.created_at.to_rfc3339(),
    })
}

pub fn subscription_to_json(s: &Subscription) -> serde_json::Value {
    serde_json::json!({
        "id": s.id.to_string(),
        "bundleId": s.bundle_id.to_string(),
        "accountId": s.account_id.to_string(),
        "planName": s.plan_name,
        "state": s.state,
        "startDate": s.start_date,
        "billingEndDate": s.billing_end_date,
        "pendingChange": s.pending_change,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use billflow_core::AccountId;

    #[test]
    fn completion_params_default_to_no_wait() {
        let params: CompletionParams = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(!params.call_completion);
        assert_eq!(params.timeout_secs(DEFAULT_CANCEL_TIMEOUT_SECS), 5);
    }

    #[test]
    fn create_account_defaults() {
        let req: CreateAccountRequest =
            serde_json::from_value(serde_json::json!({ "name": "Acme", "controlTags": ["AUTO_PAY_OFF"] })).unwrap();
        let new = NewAccount::from(req);
        assert!(new.payment_method);
        assert_eq!(new.utc_offset_minutes, 0);
        assert!(new.control_tags.auto_pay_off());
    }

    #[test]
    fn bad_ids_are_rejected() {
        let res = parse_id::<AccountId>("not-a-uuid", "account").unwrap_err();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
