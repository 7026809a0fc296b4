//! Synchronous completion for asynchronous billing commands.
//!
//! An entitlement command returns as soon as the entitlement is written, but
//! its consequences (invoice, payment) arrive later on the event bus. Callers
//! that pass `callCompletion=true` want the HTTP response to reflect those
//! consequences. `CompletionCoordinator::with_synchronization` provides that:
//!
//! ```text
//! snapshot control tags
//!   ↓
//! register waiter under ctx.token          (before the command runs, so no event is missed)
//!   ↓
//! run the operation → (value, timing)
//!   ↓
//! timing immediate? ── no ──→ respond(value)
//!   ↓ yes
//! wait(timeout) ─┬─ settled     → respond(value)
//!                ├─ timed out   → Unconfirmed   (408, the effect still happens)
//!                └─ interrupted → Interrupted   (500)
//!   ↓
//! unregister (always, via drop guard)
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use billflow_core::{AccountId, ControlTagSet, CorrelationToken, DomainError, DomainResult};

use super::context::CallContext;
use super::operation::Executed;
use super::registry::{CompletionRegistry, RegistryError};
use super::waiter::{CompletionWaiter, WaitResult};

/// Upper bound applied to caller-supplied wait timeouts unless configured otherwise.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(60);

/// Resolves an account's control tags (the Tag API).
#[async_trait::async_trait]
pub trait ControlTagLookup: Send + Sync {
    async fn control_tags(&self, account_id: AccountId) -> DomainResult<ControlTagSet>;
}

#[async_trait::async_trait]
impl<L> ControlTagLookup for Arc<L>
where
    L: ControlTagLookup + ?Sized,
{
    async fn control_tags(&self, account_id: AccountId) -> DomainResult<ControlTagSet> {
        (**self).control_tags(account_id).await
    }
}

/// How a synchronized call ended, when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome<R> {
    /// The operation succeeded and, if requested, the pipeline settled.
    Completed(R),
    /// The wait was interrupted; reported as an internal error.
    Interrupted,
    /// The operation succeeded but its downstream effects were not confirmed
    /// within the timeout. Nothing is rolled back.
    Unconfirmed,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompletionError {
    /// Failure from a domain collaborator, passed through unchanged.
    #[error(transparent)]
    Domain(DomainError),
    /// Catalog failure surfaced by the entitlement layer.
    #[error("catalog error: {0}")]
    Catalog(String),
    /// Completion was requested but the call context names no account.
    #[error("call completion requires an account")]
    MissingAccount,
    /// Another in-flight request already uses this correlation token.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl From<DomainError> for CompletionError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Catalog(msg) => CompletionError::Catalog(msg),
            other => CompletionError::Domain(other),
        }
    }
}

/// Unregisters a waiter when dropped, whichever way the call exits.
struct Registration<'a> {
    registry: &'a CompletionRegistry,
    token: CorrelationToken,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.registry.unregister(&self.token);
    }
}

pub struct CompletionCoordinator {
    registry: Arc<CompletionRegistry>,
    tags: Arc<dyn ControlTagLookup>,
    max_wait: Duration,
}

impl CompletionCoordinator {
    pub fn new(registry: Arc<CompletionRegistry>, tags: Arc<dyn ControlTagLookup>) -> Self {
        Self {
            registry,
            tags,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Run `operation` and, if `call_completion` is set, wait up to
    /// `timeout_secs` for its billing pipeline to settle.
    ///
    /// `respond` builds the success value from the operation's result; it is
    /// not called for `Interrupted` or `Unconfirmed`.
    pub async fn with_synchronization<T, R, F, Fut, B>(
        &self,
        operation: F,
        timeout_secs: u64,
        call_completion: bool,
        ctx: &CallContext,
        respond: B,
    ) -> Result<CompletionOutcome<R>, CompletionError>
    where
        F: FnOnce(CallContext) -> Fut + Send,
        Fut: Future<Output = DomainResult<Executed<T>>> + Send,
        T: Send,
        B: FnOnce(T) -> R + Send,
    {
        if !call_completion {
            let executed = operation(ctx.clone()).await?;
            return Ok(CompletionOutcome::Completed(respond(executed.into_value())));
        }

        let account_id = ctx.account_id().ok_or(CompletionError::MissingAccount)?;
        let tags = self.tags.control_tags(account_id).await?;

        let token = ctx.token();
        let waiter = Arc::new(CompletionWaiter::new(token, tags));
        self.registry.register(waiter.clone())?;
        let _registration = Registration {
            registry: &self.registry,
            token,
        };

        let (value, timing) = operation(ctx.clone()).await?.into_parts();

        if !timing.is_immediate() {
            debug!(token = %token, ?timing, "effect is deferred; not waiting");
            return Ok(CompletionOutcome::Completed(respond(value)));
        }

        let timeout = Duration::from_secs(timeout_secs).min(self.max_wait);
        tokio::select! {
            biased;
            _ = ctx.interrupt().cancelled() => {
                warn!(token = %token, "interrupted while waiting for completion");
                Ok(CompletionOutcome::Interrupted)
            }
            waited = waiter.wait(timeout) => match waited {
                WaitResult::Completed => Ok(CompletionOutcome::Completed(respond(value))),
                WaitResult::TimedOut => {
                    info!(token = %token, timeout_secs = timeout.as_secs(), "completion not confirmed in time");
                    Ok(CompletionOutcome::Unconfirmed)
                }
            },
        }
    }
}

impl core::fmt::Debug for CompletionCoordinator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CompletionCoordinator")
            .field("registry", &self.registry)
            .field("max_wait", &self.max_wait)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use billflow_core::{ControlTag, InvoiceId, PaymentId};
    use billflow_events::{DomainEvent, EventEnvelope};
    use chrono::NaiveDate;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct StaticTags {
        by_account: Mutex<HashMap<AccountId, ControlTagSet>>,
    }

    impl StaticTags {
        fn set(&self, account_id: AccountId, tags: ControlTagSet) {
            self.by_account.lock().unwrap().insert(account_id, tags);
        }
    }

    #[async_trait::async_trait]
    impl ControlTagLookup for StaticTags {
        async fn control_tags(&self, account_id: AccountId) -> DomainResult<ControlTagSet> {
            self.by_account
                .lock()
                .unwrap()
                .get(&account_id)
                .copied()
                .ok_or_else(|| DomainError::not_found("account"))
        }
    }

    struct Fixture {
        registry: Arc<CompletionRegistry>,
        coordinator: CompletionCoordinator,
        account_id: AccountId,
    }

    fn fixture(account_tags: ControlTagSet) -> Fixture {
        let registry = Arc::new(CompletionRegistry::new());
        let tags = Arc::new(StaticTags::default());
        let account_id = AccountId::new();
        tags.set(account_id, account_tags);
        let coordinator = CompletionCoordinator::new(registry.clone(), tags);
        Fixture {
            registry,
            coordinator,
            account_id,
        }
    }

    fn ctx(account_id: AccountId) -> CallContext {
        CallContext::new(CorrelationToken::new()).with_account(account_id)
    }

    fn publish(registry: &CompletionRegistry, ctx: &CallContext, event: DomainEvent) {
        let account_id = ctx.account_id().unwrap();
        registry.dispatch(&EventEnvelope::now(ctx.token(), account_id, event));
    }

    #[tokio::test]
    async fn without_completion_no_waiter_is_registered() {
        let fx = fixture(ControlTagSet::empty());
        let ctx = CallContext::new(CorrelationToken::new());
        let registry = fx.registry.clone();
        let token = ctx.token();

        let outcome = fx
            .coordinator
            .with_synchronization(
                move |_ctx| async move {
                    assert!(!registry.contains(&token));
                    Ok(Executed::immediate(7))
                },
                3,
                false,
                &ctx,
                |v| v * 2,
            )
            .await
            .unwrap();

        assert_eq!(outcome, CompletionOutcome::Completed(14));
        assert!(fx.registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_operation_returns_without_waiting() {
        let fx = fixture(ControlTagSet::empty());
        let ctx = ctx(fx.account_id);
        let started = tokio::time::Instant::now();

        let outcome = fx
            .coordinator
            .with_synchronization(
                |_ctx| async {
                    Ok(Executed::deferred("cancelled", NaiveDate::from_ymd_opt(2030, 1, 1).unwrap()))
                },
                30,
                true,
                &ctx,
                |v| v,
            )
            .await
            .unwrap();

        assert_eq!(outcome, CompletionOutcome::Completed("cancelled"));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!fx.registry.contains(&ctx.token()));
    }

    #[tokio::test(start_paused = true)]
    async fn no_settling_event_yields_unconfirmed() {
        let fx = fixture(ControlTagSet::empty());
        let ctx = ctx(fx.account_id);
        let registry = fx.registry.clone();

        let outcome = fx
            .coordinator
            .with_synchronization(
                move |ctx: CallContext| async move {
                    // An invoice with a balance alone does not settle the pipeline.
                    publish(
                        &registry,
                        &ctx,
                        DomainEvent::InvoiceCreated { invoice_id: InvoiceId::new(), amount_owed: 10 },
                    );
                    Ok(Executed::immediate(()))
                },
                2,
                true,
                &ctx,
                |_| "ok",
            )
            .await
            .unwrap();

        assert_eq!(outcome, CompletionOutcome::Unconfirmed);
        assert!(!fx.registry.contains(&ctx.token()));
    }

    #[tokio::test]
    async fn event_fired_inside_the_operation_is_not_lost() {
        let fx = fixture(ControlTagSet::empty());
        let ctx = ctx(fx.account_id);
        let registry = fx.registry.clone();

        let outcome = fx
            .coordinator
            .with_synchronization(
                move |ctx: CallContext| async move {
                    assert!(registry.contains(&ctx.token()));
                    publish(&registry, &ctx, DomainEvent::EmptyInvoice);
                    Ok(Executed::immediate(1))
                },
                5,
                true,
                &ctx,
                |v| v,
            )
            .await
            .unwrap();

        assert_eq!(outcome, CompletionOutcome::Completed(1));
        assert!(fx.registry.is_empty());
    }

    #[tokio::test]
    async fn auto_pay_off_settles_on_invoice_from_another_thread() {
        let fx = fixture(ControlTagSet::empty().with(ControlTag::AutoPayOff));
        let ctx = ctx(fx.account_id);
        let registry = fx.registry.clone();

        let outcome = fx
            .coordinator
            .with_synchronization(
                move |ctx: CallContext| async move {
                    std::thread::spawn(move || {
                        std::thread::sleep(Duration::from_millis(20));
                        publish(
                            &registry,
                            &ctx,
                            DomainEvent::InvoiceCreated { invoice_id: InvoiceId::new(), amount_owed: 10 },
                        );
                    });
                    Ok(Executed::immediate("created"))
                },
                5,
                true,
                &ctx,
                |v| v,
            )
            .await
            .unwrap();

        assert_eq!(outcome, CompletionOutcome::Completed("created"));
    }

    #[tokio::test]
    async fn payment_after_invoice_settles_default_account() {
        let fx = fixture(ControlTagSet::empty());
        let ctx = ctx(fx.account_id);
        let registry = fx.registry.clone();

        let outcome = fx
            .coordinator
            .with_synchronization(
                move |ctx: CallContext| async move {
                    let invoice_id = InvoiceId::new();
                    publish(&registry, &ctx, DomainEvent::InvoiceCreated { invoice_id, amount_owed: 10 });
                    publish(
                        &registry,
                        &ctx,
                        DomainEvent::PaymentInfo { payment_id: PaymentId::new(), invoice_id: Some(invoice_id), amount: 10 },
                    );
                    Ok(Executed::immediate(()))
                },
                5,
                true,
                &ctx,
                |_| "paid",
            )
            .await
            .unwrap();

        assert_eq!(outcome, CompletionOutcome::Completed("paid"));
    }

    #[tokio::test]
    async fn domain_errors_pass_through_and_unregister() {
        let fx = fixture(ControlTagSet::empty());
        let ctx = ctx(fx.account_id);

        let err = fx
            .coordinator
            .with_synchronization(
                |_ctx| async { Err::<Executed<()>, _>(DomainError::invariant("already cancelled")) },
                5,
                true,
                &ctx,
                |v| v,
            )
            .await
            .unwrap_err();

        assert_eq!(err, CompletionError::Domain(DomainError::invariant("already cancelled")));
        assert!(fx.registry.is_empty());
    }

    #[tokio::test]
    async fn catalog_errors_are_translated() {
        let fx = fixture(ControlTagSet::empty());
        let ctx = ctx(fx.account_id);

        let err = fx
            .coordinator
            .with_synchronization(
                |_ctx| async { Err::<Executed<()>, _>(DomainError::catalog("no such plan: gold")) },
                5,
                false,
                &ctx,
                |v| v,
            )
            .await
            .unwrap_err();

        assert_eq!(err, CompletionError::Catalog("no such plan: gold".into()));
    }

    #[tokio::test]
    async fn interruption_reports_interrupted_and_unregisters() {
        let fx = fixture(ControlTagSet::empty());
        let interrupt = CancellationToken::new();
        let ctx = ctx(fx.account_id).with_interrupt(interrupt.clone());

        let trigger = interrupt.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let outcome = fx
            .coordinator
            .with_synchronization(|_ctx| async { Ok(Executed::immediate(())) }, 30, true, &ctx, |v| v)
            .await
            .unwrap();

        assert_eq!(outcome, CompletionOutcome::Interrupted);
        assert!(fx.registry.is_empty());
    }

    #[tokio::test]
    async fn completion_without_account_is_rejected_before_running() {
        let fx = fixture(ControlTagSet::empty());
        let ctx = CallContext::new(CorrelationToken::new());
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();

        let err = fx
            .coordinator
            .with_synchronization(
                move |_ctx| async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok(Executed::immediate(()))
                },
                5,
                true,
                &ctx,
                |v| v,
            )
            .await
            .unwrap_err();

        assert_eq!(err, CompletionError::MissingAccount);
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn tag_lookup_failure_propagates_without_registering() {
        let fx = fixture(ControlTagSet::empty());
        let ctx = ctx(AccountId::new());

        let err = fx
            .coordinator
            .with_synchronization(|_ctx| async { Ok(Executed::immediate(())) }, 5, true, &ctx, |v| v)
            .await
            .unwrap_err();

        assert_eq!(err, CompletionError::Domain(DomainError::not_found("account")));
        assert!(fx.registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_clamped_by_max_wait() {
        let fx = fixture(ControlTagSet::empty());
        let coordinator = fx.coordinator.with_max_wait(Duration::from_secs(1));
        let ctx = ctx(fx.account_id);
        let started = tokio::time::Instant::now();

        let outcome = coordinator
            .with_synchronization(|_ctx| async { Ok(Executed::immediate(())) }, 3600, true, &ctx, |v| v)
            .await
            .unwrap();

        assert_eq!(outcome, CompletionOutcome::Unconfirmed);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn concurrent_use_of_a_token_is_rejected() {
        let fx = fixture(ControlTagSet::empty());
        let ctx = ctx(fx.account_id);
        fx.registry
            .register(Arc::new(CompletionWaiter::new(ctx.token(), ControlTagSet::empty())))
            .unwrap();

        let err = fx
            .coordinator
            .with_synchronization(|_ctx| async { Ok(Executed::immediate(())) }, 5, true, &ctx, |v| v)
            .await
            .unwrap_err();

        assert_eq!(err, CompletionError::Registry(RegistryError::AlreadyRegistered(ctx.token())));
        // The pre-existing waiter belongs to someone else and must survive.
        assert!(fx.registry.contains(&ctx.token()));
    }
}
