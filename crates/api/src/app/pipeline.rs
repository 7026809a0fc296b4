//! Simulated asynchronous billing pipeline.
//!
//! Each immediate entitlement change is followed, on a background task, by the
//! invoice and payment stages. Every stage publishes its outcome on the bus
//! under the correlation token of the originating request:
//!
//! ```text
//! SubscriptionTransition
//!   ├─ AUTO_INVOICING_OFF / _DRAFT → BlockingStateChange
//!   ├─ nothing to bill            → EmptyInvoice
//!   └─ InvoiceCreated
//!        ├─ AUTO_PAY_OFF          → (stop)
//!        ├─ no payment method     → PaymentError
//!        └─ PaymentInfo, InvoicePaymentInfo
//! ```

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use billflow_core::{AccountId, Clock, CorrelationToken, DomainError, InvoiceId, PaymentId, SubscriptionId};
use billflow_events::{BillingEnvelope, DomainEvent, EventBus, EventEnvelope, InMemoryBusError, InMemoryEventBus, TransitionType};

use super::store::{BillingStore, Invoice, InvoiceStatus, Payment, PaymentStatus};

pub type BillingBus = Arc<InMemoryEventBus<BillingEnvelope>>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("event bus publish failed: {0:?}")]
    Publish(InMemoryBusError),
}

/// One pipeline run, triggered by one entitlement change.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub token: CorrelationToken,
    pub account_id: AccountId,
    pub subscription_id: SubscriptionId,
    pub transition: TransitionType,
    /// Amount to invoice; zero yields an empty invoice.
    pub amount: i64,
}

#[derive(Clone)]
pub struct BillingPipeline {
    store: Arc<BillingStore>,
    bus: BillingBus,
    clock: Arc<dyn Clock>,
    step_delay: Duration,
}

impl BillingPipeline {
    pub fn new(store: Arc<BillingStore>, bus: BillingBus, clock: Arc<dyn Clock>, step_delay: Duration) -> Self {
        Self {
            store,
            bus,
            clock,
            step_delay,
        }
    }

    /// Run the downstream stages in the background.
    pub fn start(&self, run: PipelineRun) {
        let pipeline = self.clone();
        tokio::spawn(async move {
            let token = run.token;
            if let Err(err) = pipeline.execute(run).await {
                warn!(token = %token, error = %err, "billing pipeline aborted");
            }
        });
    }

    async fn execute(&self, run: PipelineRun) -> Result<(), PipelineError> {
        // Tags are read when the pipeline runs, like the real invoice system does.
        let account = self.store.account(run.account_id)?;
        let tags = account.control_tags;

        self.step().await;
        self.publish(
            &run,
            DomainEvent::SubscriptionTransition {
                subscription_id: run.subscription_id,
                transition: run.transition,
                remaining_events: 0,
            },
        )?;

        if tags.invoicing_suppressed() {
            if tags.auto_invoicing_draft() && run.amount != 0 {
                self.store.insert_invoice(Invoice {
                    id: InvoiceId::new(),
                    account_id: run.account_id,
                    subscription_id: run.subscription_id,
                    status: InvoiceStatus::Draft,
                    amount: run.amount,
                    balance: run.amount,
                    created_at: self.clock.now(),
                });
            }
            let state_name = if tags.auto_invoicing_off() {
                "AUTO_INVOICING_OFF"
            } else {
                "AUTO_INVOICING_DRAFT"
            };
            return self.publish(
                &run,
                DomainEvent::BlockingStateChange {
                    subscription_id: Some(run.subscription_id),
                    state_name: state_name.to_string(),
                },
            );
        }

        self.step().await;
        if run.amount == 0 {
            return self.publish(&run, DomainEvent::EmptyInvoice);
        }

        let invoice = Invoice {
            id: InvoiceId::new(),
            account_id: run.account_id,
            subscription_id: run.subscription_id,
            status: InvoiceStatus::Committed,
            amount: run.amount,
            balance: run.amount,
            created_at: self.clock.now(),
        };
        self.store.insert_invoice(invoice.clone());
        self.publish(
            &run,
            DomainEvent::InvoiceCreated {
                invoice_id: invoice.id,
                amount_owed: invoice.balance,
            },
        )?;

        if invoice.balance <= 0 || tags.auto_pay_off() {
            debug!(token = %run.token, invoice_id = %invoice.id, "no payment attempt");
            return Ok(());
        }

        self.step().await;
        if !account.payment_method {
            let message = "no default payment method".to_string();
            self.store.record_payment(Payment {
                id: PaymentId::new(),
                account_id: run.account_id,
                invoice_id: invoice.id,
                amount: invoice.balance,
                status: PaymentStatus::Failed,
                message: Some(message.clone()),
                created_at: self.clock.now(),
            })?;
            return self.publish(
                &run,
                DomainEvent::PaymentError {
                    invoice_id: Some(invoice.id),
                    message,
                },
            );
        }

        let payment_id = PaymentId::new();
        self.store.record_payment(Payment {
            id: payment_id,
            account_id: run.account_id,
            invoice_id: invoice.id,
            amount: invoice.balance,
            status: PaymentStatus::Success,
            message: None,
            created_at: self.clock.now(),
        })?;
        self.publish(
            &run,
            DomainEvent::PaymentInfo {
                payment_id,
                invoice_id: Some(invoice.id),
                amount: invoice.balance,
            },
        )?;
        self.publish(
            &run,
            DomainEvent::InvoicePaymentInfo {
                invoice_id: invoice.id,
                payment_id,
                amount: invoice.balance,
            },
        )
    }

    async fn step(&self) {
        if !self.step_delay.is_zero() {
            tokio::time::sleep(self.step_delay).await;
        }
    }

    fn publish(&self, run: &PipelineRun, event: DomainEvent) -> Result<(), PipelineError> {
        debug!(token = %run.token, kind = %event.kind(), "publishing");
        self.bus
            .publish(EventEnvelope::now(run.token, run.account_id, event))
            .map_err(PipelineError::Publish)
    }
}

impl core::fmt::Debug for BillingPipeline {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BillingPipeline")
            .field("step_delay", &self.step_delay)
            .finish_non_exhaustive()
    }
}
