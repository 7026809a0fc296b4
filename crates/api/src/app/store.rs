//! In-memory billing records: accounts, subscriptions, invoices, payments and
//! audit logs, plus the plan catalog.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use serde::Serialize;

use billflow_core::{
    AccountId, BundleId, ControlTagSet, CorrelationToken, DomainError, DomainResult, InvoiceId,
    PaymentId, SubscriptionId,
};
use billflow_infra::completion::CallContext;

/// Largest accepted distance from UTC, in minutes.
const MAX_OFFSET_MINUTES: i32 = 14 * 60;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub utc_offset_minutes: i32,
    pub control_tags: ControlTagSet,
    /// Whether a default payment method is on file.
    pub payment_method: bool,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(
        name: impl Into<String>,
        utc_offset_minutes: i32,
        control_tags: ControlTagSet,
        payment_method: bool,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("account name must not be empty"));
        }
        if !(-MAX_OFFSET_MINUTES..=MAX_OFFSET_MINUTES).contains(&utc_offset_minutes) {
            return Err(DomainError::validation(format!(
                "utc offset out of range: {utc_offset_minutes} minutes"
            )));
        }
        Ok(Self {
            id: AccountId::new(),
            name,
            utc_offset_minutes,
            control_tags,
            payment_method,
            created_at,
        })
    }

    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionState {
    Active,
    /// Cancellation is scheduled for `billing_end_date`.
    PendingCancel,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPlanChange {
    pub plan_name: String,
    pub effective_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: SubscriptionId,
    pub bundle_id: BundleId,
    pub account_id: AccountId,
    pub plan_name: String,
    pub state: SubscriptionState,
    pub start_date: NaiveDate,
    pub billing_end_date: Option<NaiveDate>,
    pub pending_change: Option<PendingPlanChange>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Draft,
    Committed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: InvoiceId,
    pub account_id: AccountId,
    pub subscription_id: SubscriptionId,
    pub status: InvoiceStatus,
    pub amount: i64,
    pub balance: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: PaymentId,
    pub account_id: AccountId,
    pub invoice_id: InvoiceId,
    pub amount: i64,
    pub status: PaymentStatus,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub token: CorrelationToken,
    pub account_id: AccountId,
    pub action: String,
    pub created_by: Option<String>,
    pub reason: Option<String>,
    pub comment: Option<String>,
    pub at: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn from_context(ctx: &CallContext, account_id: AccountId, action: &str, at: DateTime<Utc>) -> Self {
        Self {
            token: ctx.token(),
            account_id,
            action: action.to_string(),
            created_by: ctx.created_by().map(str::to_string),
            reason: ctx.reason().map(str::to_string),
            comment: ctx.comment().map(str::to_string),
            at,
        }
    }
}

/// Monthly plan prices in minor units.
#[derive(Debug, Clone)]
pub struct Catalog {
    plans: HashMap<String, i64>,
}

impl Catalog {
    pub fn new<I, S>(plans: I) -> Self
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        Self {
            plans: plans.into_iter().map(|(name, price)| (name.into(), price)).collect(),
        }
    }

    pub fn price(&self, plan_name: &str) -> DomainResult<i64> {
        self.plans
            .get(plan_name)
            .copied()
            .ok_or_else(|| DomainError::catalog(format!("unknown plan: {plan_name}")))
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new([
            ("trial-monthly", 0),
            ("basic-monthly", 1_000),
            ("standard-monthly", 2_500),
            ("pro-monthly", 5_000),
        ])
    }
}

#[derive(Debug, Default)]
struct Tables {
    accounts: HashMap<AccountId, Account>,
    subscriptions: HashMap<SubscriptionId, Subscription>,
    invoices: HashMap<InvoiceId, Invoice>,
    payments: HashMap<PaymentId, Payment>,
    audit: Vec<AuditLogEntry>,
}

/// Thread-safe record store shared by request handlers and the pipeline.
#[derive(Debug, Default)]
pub struct BillingStore {
    tables: RwLock<Tables>,
}

impl BillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> R {
        f(&self.tables.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write<R>(&self, f: impl FnOnce(&mut Tables) -> R) -> R {
        f(&mut self.tables.write().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn insert_account(&self, account: Account) {
        self.write(|t| t.accounts.insert(account.id, account));
    }

    pub fn account(&self, id: AccountId) -> DomainResult<Account> {
        self.read(|t| t.accounts.get(&id).cloned())
            .ok_or_else(|| DomainError::not_found(format!("account {id}")))
    }

    pub fn set_control_tags(&self, id: AccountId, tags: ControlTagSet) -> DomainResult<Account> {
        self.write(|t| {
            let account = t
                .accounts
                .get_mut(&id)
                .ok_or_else(|| DomainError::not_found(format!("account {id}")))?;
            account.control_tags = tags;
            Ok(account.clone())
        })
    }

    pub fn insert_subscription(&self, subscription: Subscription) {
        self.write(|t| t.subscriptions.insert(subscription.id, subscription));
    }

    pub fn subscription(&self, id: SubscriptionId) -> DomainResult<Subscription> {
        self.read(|t| t.subscriptions.get(&id).cloned())
            .ok_or_else(|| DomainError::not_found(format!("subscription {id}")))
    }

    /// Apply `f` to the stored subscription under the write lock.
    pub fn update_subscription<R>(
        &self,
        id: SubscriptionId,
        f: impl FnOnce(&mut Subscription) -> DomainResult<R>,
    ) -> DomainResult<R> {
        self.write(|t| {
            let sub = t
                .subscriptions
                .get_mut(&id)
                .ok_or_else(|| DomainError::not_found(format!("subscription {id}")))?;
            f(sub)
        })
    }

    pub fn subscriptions_for(&self, account_id: AccountId) -> Vec<Subscription> {
        let mut subs: Vec<_> = self.read(|t| {
            t.subscriptions
                .values()
                .filter(|s| s.account_id == account_id)
                .cloned()
                .collect()
        });
        subs.sort_by_key(|s| s.created_at);
        subs
    }

    pub fn insert_invoice(&self, invoice: Invoice) {
        self.write(|t| t.invoices.insert(invoice.id, invoice));
    }

    pub fn invoices_for(&self, account_id: AccountId) -> Vec<Invoice> {
        let mut invoices: Vec<_> = self.read(|t| {
            t.invoices
                .values()
                .filter(|i| i.account_id == account_id)
                .cloned()
                .collect()
        });
        invoices.sort_by_key(|i| i.created_at);
        invoices
    }

    /// Store `payment` and, if it succeeded, reduce the invoice balance.
    pub fn record_payment(&self, payment: Payment) -> DomainResult<()> {
        self.write(|t| {
            let invoice = t
                .invoices
                .get_mut(&payment.invoice_id)
                .ok_or_else(|| DomainError::not_found(format!("invoice {}", payment.invoice_id)))?;
            if payment.status == PaymentStatus::Success {
                invoice.balance -= payment.amount;
            }
            t.payments.insert(payment.id, payment);
            Ok(())
        })
    }

    pub fn payments_for(&self, account_id: AccountId) -> Vec<Payment> {
        let mut payments: Vec<_> = self.read(|t| {
            t.payments
                .values()
                .filter(|p| p.account_id == account_id)
                .cloned()
                .collect()
        });
        payments.sort_by_key(|p| p.created_at);
        payments
    }

    pub fn record_audit(&self, entry: AuditLogEntry) {
        self.write(|t| t.audit.push(entry));
    }

    pub fn audit_logs_for(&self, account_id: AccountId) -> Vec<AuditLogEntry> {
        self.read(|t| {
            t.audit
                .iter()
                .filter(|e| e.account_id == account_id)
                .cloned()
                .collect()
        })
    }
}
