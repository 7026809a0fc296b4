use serde::{Deserialize, Serialize};

use billflow_core::{InvoiceId, PaymentId, SubscriptionId};

/// What happened to a subscription.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionType {
    Create,
    Change,
    Cancel,
    Uncancel,
    Phase,
}

/// Events published by the billing pipeline.
///
/// Amounts are in minor currency units. `amount_owed` may be negative when
/// an invoice only carries credits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainEvent {
    /// An entitlement/subscription transition became effective.
    SubscriptionTransition {
        subscription_id: SubscriptionId,
        transition: TransitionType,
        /// Further transitions still pending for the same user operation.
        remaining_events: u32,
    },
    /// An account or subscription blocking state changed.
    BlockingStateChange {
        subscription_id: Option<SubscriptionId>,
        state_name: String,
    },
    /// An invoice was generated and committed.
    InvoiceCreated {
        invoice_id: InvoiceId,
        amount_owed: i64,
    },
    /// Invoice generation ran and found nothing to bill.
    EmptyInvoice,
    PaymentInfo {
        payment_id: PaymentId,
        invoice_id: Option<InvoiceId>,
        amount: i64,
    },
    PaymentError {
        invoice_id: Option<InvoiceId>,
        message: String,
    },
    PaymentPluginError {
        invoice_id: Option<InvoiceId>,
        message: String,
    },
    InvoicePaymentInfo {
        invoice_id: InvoiceId,
        payment_id: PaymentId,
        amount: i64,
    },
    InvoicePaymentError {
        invoice_id: InvoiceId,
        message: String,
    },
}

/// Payload-free discriminant of [`DomainEvent`], for logging and filtering.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SubscriptionTransition,
    BlockingStateChange,
    InvoiceCreated,
    EmptyInvoice,
    PaymentInfo,
    PaymentError,
    PaymentPluginError,
    InvoicePaymentInfo,
    InvoicePaymentError,
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DomainEvent::SubscriptionTransition { .. } => EventKind::SubscriptionTransition,
            DomainEvent::BlockingStateChange { .. } => EventKind::BlockingStateChange,
            DomainEvent::InvoiceCreated { .. } => EventKind::InvoiceCreated,
            DomainEvent::EmptyInvoice => EventKind::EmptyInvoice,
            DomainEvent::PaymentInfo { .. } => EventKind::PaymentInfo,
            DomainEvent::PaymentError { .. } => EventKind::PaymentError,
            DomainEvent::PaymentPluginError { .. } => EventKind::PaymentPluginError,
            DomainEvent::InvoicePaymentInfo { .. } => EventKind::InvoicePaymentInfo,
            DomainEvent::InvoicePaymentError { .. } => EventKind::InvoicePaymentError,
        }
    }

    /// Stable event name (e.g. "invoice.created").
    pub fn event_type(&self) -> &'static str {
        self.kind().as_str()
    }
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SubscriptionTransition => "subscription.transition",
            EventKind::BlockingStateChange => "blocking_state.changed",
            EventKind::InvoiceCreated => "invoice.created",
            EventKind::EmptyInvoice => "invoice.empty",
            EventKind::PaymentInfo => "payment.info",
            EventKind::PaymentError => "payment.error",
            EventKind::PaymentPluginError => "payment.plugin_error",
            EventKind::InvoicePaymentInfo => "invoice_payment.info",
            EventKind::InvoicePaymentError => "invoice_payment.error",
        }
    }
}

impl core::fmt::Display for EventKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
