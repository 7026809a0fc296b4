//! Service wiring and the billing operations behind the HTTP routes.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use billflow_core::{
    AccountId, BundleId, Clock, ControlTagSet, DomainError, DomainResult, SubscriptionId, SystemClock,
};
use billflow_events::{InMemoryEventBus, TransitionType};
use billflow_infra::completion::{
    CallContext, CompletionCoordinator, CompletionListener, CompletionRegistry, ControlTagLookup,
    EffectTiming, Executed, ListenerHandle,
};
use billflow_infra::config::AppConfig;
use billflow_infra::fetch::{FetchAggregator, FetchError, FetchOutcome, FetchTask};

use super::pipeline::{BillingBus, BillingPipeline, PipelineRun};
use super::store::{
    Account, AuditLogEntry, BillingStore, Catalog, PendingPlanChange, Subscription, SubscriptionState,
};

/// Pause between simulated pipeline stages.
const PIPELINE_STEP_DELAY: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub name: String,
    pub utc_offset_minutes: i32,
    pub control_tags: ControlTagSet,
    pub payment_method: bool,
}

/// Tag API backed by the account table.
#[derive(Debug, Clone)]
pub struct StoreTagLookup {
    store: Arc<BillingStore>,
}

#[async_trait::async_trait]
impl ControlTagLookup for StoreTagLookup {
    async fn control_tags(&self, account_id: AccountId) -> DomainResult<ControlTagSet> {
        Ok(self.store.account(account_id)?.control_tags)
    }
}

pub struct AppServices {
    store: Arc<BillingStore>,
    catalog: Catalog,
    clock: Arc<dyn Clock>,
    pipeline: BillingPipeline,
    coordinator: CompletionCoordinator,
    aggregator: FetchAggregator,
    shutdown: CancellationToken,
    _listener: ListenerHandle,
}

/// Build the in-memory services with the wall clock.
pub fn build_services(config: &AppConfig, shutdown: CancellationToken) -> io::Result<AppServices> {
    build_services_with_clock(config, shutdown, Arc::new(SystemClock))
}

pub fn build_services_with_clock(
    config: &AppConfig,
    shutdown: CancellationToken,
    clock: Arc<dyn Clock>,
) -> io::Result<AppServices> {
    let store = Arc::new(BillingStore::new());
    let bus: BillingBus = Arc::new(InMemoryEventBus::new());
    let registry = Arc::new(CompletionRegistry::new());

    // Subscribe before any request can publish.
    let listener = CompletionListener::spawn(bus.clone(), registry.clone())?;

    let tags = Arc::new(StoreTagLookup { store: store.clone() });
    let coordinator = CompletionCoordinator::new(registry, tags).with_max_wait(config.max_call_timeout);
    let aggregator = FetchAggregator::new(config.fetch_mode, config.fetch_deadline);

    info!(
        fetch_mode = %config.fetch_mode,
        fetch_deadline_ms = config.fetch_deadline.as_millis() as u64,
        max_call_timeout_secs = config.max_call_timeout.as_secs(),
        "services ready"
    );

    Ok(AppServices {
        pipeline: BillingPipeline::new(store.clone(), bus, clock.clone(), PIPELINE_STEP_DELAY),
        store,
        catalog: Catalog::default(),
        clock,
        coordinator,
        aggregator,
        shutdown,
        _listener: listener,
    })
}

impl AppServices {
    pub fn coordinator(&self) -> &CompletionCoordinator {
        &self.coordinator
    }

    /// Cancelled when the server begins shutting down.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    fn today(&self, account: &Account) -> NaiveDate {
        self.clock.today_in(account.offset())
    }

    fn audit(&self, ctx: &CallContext, account_id: AccountId, action: &str) {
        self.store
            .record_audit(AuditLogEntry::from_context(ctx, account_id, action, self.clock.now()));
    }

    // -------------------------
    // Accounts
    // -------------------------

    pub fn create_account(&self, ctx: &CallContext, new: NewAccount) -> DomainResult<Account> {
        let account = Account::new(
            new.name,
            new.utc_offset_minutes,
            new.control_tags,
            new.payment_method,
            self.clock.now(),
        )?;
        self.store.insert_account(account.clone());
        self.audit(ctx, account.id, "account.create");
        Ok(account)
    }

    pub fn account(&self, id: AccountId) -> DomainResult<Account> {
        self.store.account(id)
    }

    pub fn replace_control_tags(
        &self,
        ctx: &CallContext,
        id: AccountId,
        tags: ControlTagSet,
    ) -> DomainResult<Account> {
        let account = self.store.set_control_tags(id, tags)?;
        self.audit(ctx, id, "account.tags.replace");
        Ok(account)
    }

    // -------------------------
    // Subscriptions
    // -------------------------

    pub fn subscription(&self, id: SubscriptionId) -> DomainResult<Subscription> {
        self.store.subscription(id)
    }

    /// Create a subscription starting today. Always immediate.
    pub async fn create_subscription(
        &self,
        ctx: &CallContext,
        account_id: AccountId,
        plan_name: &str,
    ) -> DomainResult<Executed<Subscription>> {
        let account = self.store.account(account_id)?;
        let price = self.catalog.price(plan_name)?;

        let subscription = Subscription {
            id: SubscriptionId::new(),
            bundle_id: BundleId::new(),
            account_id,
            plan_name: plan_name.to_string(),
            state: SubscriptionState::Active,
            start_date: self.today(&account),
            billing_end_date: None,
            pending_change: None,
            created_at: self.clock.now(),
        };
        self.store.insert_subscription(subscription.clone());
        self.audit(ctx, account_id, "subscription.create");

        self.pipeline.start(PipelineRun {
            token: ctx.token(),
            account_id,
            subscription_id: subscription.id,
            transition: TransitionType::Create,
            amount: price,
        });
        Ok(Executed::immediate(subscription))
    }

    /// Change plan on `requested_date` (today when absent).
    pub async fn change_plan(
        &self,
        ctx: &CallContext,
        id: SubscriptionId,
        plan_name: &str,
        requested_date: Option<NaiveDate>,
    ) -> DomainResult<Executed<Subscription>> {
        let current = self.store.subscription(id)?;
        let account = self.store.account(current.account_id)?;
        let price = self.catalog.price(plan_name)?;
        let today = self.today(&account);
        let effective = requested_date.unwrap_or(today);

        let updated = self.store.update_subscription(id, |sub| {
            if sub.state != SubscriptionState::Active {
                return Err(DomainError::invariant(format!("subscription {id} is not active")));
            }
            if sub.plan_name == plan_name && sub.pending_change.is_none() {
                return Err(DomainError::validation(format!("subscription is already on {plan_name}")));
            }
            if effective > today {
                sub.pending_change = Some(PendingPlanChange {
                    plan_name: plan_name.to_string(),
                    effective_date: effective,
                });
            } else {
                sub.plan_name = plan_name.to_string();
                sub.pending_change = None;
            }
            Ok(sub.clone())
        })?;
        self.audit(ctx, account.id, "subscription.change_plan");

        // Immediate only if the active plan is now the requested one.
        let timing = if updated.plan_name == plan_name {
            EffectTiming::Immediate
        } else {
            EffectTiming::for_account(
                updated.pending_change.as_ref().map(|c| c.effective_date),
                self.clock.as_ref(),
                account.offset(),
            )
        };

        if timing.is_immediate() {
            self.pipeline.start(PipelineRun {
                token: ctx.token(),
                account_id: account.id,
                subscription_id: id,
                transition: TransitionType::Change,
                amount: price,
            });
        }
        Ok(Executed::new(updated, timing))
    }

    /// Cancel on `requested_date` (today when absent).
    pub async fn cancel_subscription(
        &self,
        ctx: &CallContext,
        id: SubscriptionId,
        requested_date: Option<NaiveDate>,
    ) -> DomainResult<Executed<Subscription>> {
        let current = self.store.subscription(id)?;
        let account = self.store.account(current.account_id)?;
        let today = self.today(&account);
        let end = requested_date.unwrap_or(today);

        let updated = self.store.update_subscription(id, |sub| {
            if sub.state != SubscriptionState::Active {
                return Err(DomainError::invariant(format!("subscription {id} is already cancelled")));
            }
            if end < sub.start_date {
                return Err(DomainError::validation("cancellation date precedes start date"));
            }
            sub.billing_end_date = Some(end);
            sub.pending_change = None;
            sub.state = if end > today {
                SubscriptionState::PendingCancel
            } else {
                SubscriptionState::Cancelled
            };
            Ok(sub.clone())
        })?;
        self.audit(ctx, account.id, "subscription.cancel");

        let timing = EffectTiming::for_account(updated.billing_end_date, self.clock.as_ref(), account.offset());

        if timing.is_immediate() {
            self.pipeline.start(PipelineRun {
                token: ctx.token(),
                account_id: account.id,
                subscription_id: id,
                transition: TransitionType::Cancel,
                amount: 0,
            });
        }
        Ok(Executed::new(updated, timing))
    }

    // -------------------------
    // Timeline
    // -------------------------

    /// Account, subscriptions, invoices, payments and audit logs, fetched
    /// under the configured deadline.
    pub async fn timeline(
        &self,
        account_id: AccountId,
        interrupt: &CancellationToken,
    ) -> Result<FetchOutcome<Value>, FetchError<DomainError>> {
        let tasks = vec![
            self.source("account", move |store| {
                store.account(account_id).and_then(|a| to_json(&a))
            }),
            self.source("bundles", move |store| to_json(&store.subscriptions_for(account_id))),
            self.source("invoices", move |store| to_json(&store.invoices_for(account_id))),
            self.source("payments", move |store| to_json(&store.payments_for(account_id))),
            self.source("auditLogs", move |store| to_json(&store.audit_logs_for(account_id))),
        ];
        self.aggregator.run(tasks, interrupt).await
    }

    fn source<F>(&self, name: &str, read: F) -> FetchTask<Value, DomainError>
    where
        F: FnOnce(&BillingStore) -> DomainResult<Value> + Send + 'static,
    {
        let store = self.store.clone();
        FetchTask::new(name, move |_cancel| async move { read(&store) })
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> DomainResult<Value> {
    serde_json::to_value(value).map_err(|e| DomainError::invariant(format!("serialize: {e}")))
}

impl core::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AppServices")
            .field("coordinator", &self.coordinator)
            .field("aggregator", &self.aggregator)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use billflow_core::{ControlTag, CorrelationToken, FixedClock};
    use billflow_infra::fetch::FetchMode;

    fn services(clock: Arc<FixedClock>) -> AppServices {
        let config = AppConfig::default().with_fetch_mode(FetchMode::Parallel);
        build_services_with_clock(&config, CancellationToken::new(), clock).unwrap()
    }

    fn clock_at(y: i32, m: u32, d: u32, h: u32) -> Arc<FixedClock> {
        Arc::new(FixedClock::new(Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()))
    }

    fn ctx() -> CallContext {
        CallContext::new(CorrelationToken::new()).with_audit(Some("tester".into()), Some("test".into()), None)
    }

    fn new_account(offset: i32) -> NewAccount {
        NewAccount {
            name: "Acme".into(),
            utc_offset_minutes: offset,
            control_tags: ControlTagSet::empty().with(ControlTag::AutoPayOff),
            payment_method: true,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn create_is_immediate_and_audited() {
        let svc = services(clock_at(2026, 3, 1, 12));
        let account = svc.create_account(&ctx(), new_account(0)).unwrap();

        let executed = svc.create_subscription(&ctx(), account.id, "basic-monthly").await.unwrap();

        assert!(executed.timing().is_immediate());
        assert_eq!(executed.value().start_date, date(2026, 3, 1));
        let audit = svc.store.audit_logs_for(account.id);
        assert_eq!(audit.len(), 2);
        assert_eq!(audit[1].created_by.as_deref(), Some("tester"));
    }

    #[tokio::test]
    async fn unknown_plan_is_a_catalog_error() {
        let svc = services(clock_at(2026, 3, 1, 12));
        let account = svc.create_account(&ctx(), new_account(0)).unwrap();

        let err = svc.create_subscription(&ctx(), account.id, "gold").await.unwrap_err();
        assert!(matches!(err, DomainError::Catalog(_)));
    }

    #[tokio::test]
    async fn cancel_today_in_account_zone_is_immediate() {
        // 02:00 UTC on March 2nd is still March 1st at UTC-05:00.
        let svc = services(clock_at(2026, 3, 2, 2));
        let account = svc.create_account(&ctx(), new_account(-300)).unwrap();
        let sub = svc
            .create_subscription(&ctx(), account.id, "basic-monthly")
            .await
            .unwrap()
            .into_value();

        let executed = svc
            .cancel_subscription(&ctx(), sub.id, Some(date(2026, 3, 1)))
            .await
            .unwrap();

        assert!(executed.timing().is_immediate());
        assert_eq!(executed.value().state, SubscriptionState::Cancelled);
    }

    #[tokio::test]
    async fn future_cancel_is_deferred_and_cannot_repeat() {
        let svc = services(clock_at(2026, 3, 1, 12));
        let account = svc.create_account(&ctx(), new_account(0)).unwrap();
        let sub = svc
            .create_subscription(&ctx(), account.id, "basic-monthly")
            .await
            .unwrap()
            .into_value();

        let executed = svc
            .cancel_subscription(&ctx(), sub.id, Some(date(2026, 4, 1)))
            .await
            .unwrap();
        assert_eq!(executed.timing(), EffectTiming::Deferred { effective: date(2026, 4, 1) });
        assert_eq!(executed.value().state, SubscriptionState::PendingCancel);

        let err = svc.cancel_subscription(&ctx(), sub.id, None).await.unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn future_plan_change_is_pending() {
        let svc = services(clock_at(2026, 3, 1, 12));
        let account = svc.create_account(&ctx(), new_account(0)).unwrap();
        let sub = svc
            .create_subscription(&ctx(), account.id, "basic-monthly")
            .await
            .unwrap()
            .into_value();

        let executed = svc
            .change_plan(&ctx(), sub.id, "pro-monthly", Some(date(2026, 5, 1)))
            .await
            .unwrap();

        assert!(!executed.timing().is_immediate());
        assert_eq!(executed.value().plan_name, "basic-monthly");
        assert_eq!(
            executed.value().pending_change.as_ref().map(|c| c.plan_name.as_str()),
            Some("pro-monthly")
        );

        let now = svc.change_plan(&ctx(), sub.id, "pro-monthly", None).await.unwrap();
        assert!(now.timing().is_immediate());
        assert_eq!(now.value().plan_name, "pro-monthly");
        assert!(now.value().pending_change.is_none());
    }

    #[tokio::test]
    async fn plan_change_timing_uses_the_account_zone() {
        // 02:00 UTC on March 2nd is still March 1st at UTC-05:00.
        let svc = services(clock_at(2026, 3, 2, 2));
        let account = svc.create_account(&ctx(), new_account(-300)).unwrap();
        let sub = svc
            .create_subscription(&ctx(), account.id, "basic-monthly")
            .await
            .unwrap()
            .into_value();

        let executed = svc
            .change_plan(&ctx(), sub.id, "pro-monthly", Some(date(2026, 3, 2)))
            .await
            .unwrap();

        assert_eq!(executed.timing(), EffectTiming::Deferred { effective: date(2026, 3, 2) });
        assert_eq!(executed.value().plan_name, "basic-monthly");
    }

    #[tokio::test]
    async fn backdated_plan_change_applies_now() {
        let svc = services(clock_at(2026, 3, 10, 12));
        let account = svc.create_account(&ctx(), new_account(0)).unwrap();
        let sub = svc
            .create_subscription(&ctx(), account.id, "basic-monthly")
            .await
            .unwrap()
            .into_value();

        let executed = svc
            .change_plan(&ctx(), sub.id, "standard-monthly", Some(date(2026, 3, 1)))
            .await
            .unwrap();

        assert!(executed.timing().is_immediate());
        assert_eq!(executed.value().plan_name, "standard-monthly");
    }

    #[tokio::test]
    async fn pipeline_records_use_the_service_clock() {
        let clock = clock_at(2026, 3, 1, 12);
        let svc = services(clock.clone());
        let account = svc.create_account(&ctx(), new_account(0)).unwrap();
        svc.create_subscription(&ctx(), account.id, "basic-monthly").await.unwrap();

        // Step delay is 20ms per stage; invoicing is the second stage.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let invoices = svc.store.invoices_for(account.id);
        assert_eq!(invoices.len(), 1);
        assert_eq!(invoices[0].created_at, clock.now());
    }

    #[tokio::test]
    async fn timeline_collects_every_source() {
        let svc = services(clock_at(2026, 3, 1, 12));
        let account = svc.create_account(&ctx(), new_account(0)).unwrap();
        svc.create_subscription(&ctx(), account.id, "basic-monthly").await.unwrap();

        let view = svc
            .timeline(account.id, &CancellationToken::new())
            .await
            .unwrap()
            .into_complete()
            .unwrap();

        let names: Vec<_> = view.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["account", "auditLogs", "bundles", "invoices", "payments"]);
        assert_eq!(view["bundles"].as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn timeline_for_unknown_account_fails() {
        let svc = services(clock_at(2026, 3, 1, 12));
        let err = svc
            .timeline(AccountId::new(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Source { ref name, .. } if name == "account"));
    }
}
