//! Business short-circuit rules for completion.
//!
//! A command kicks off a pipeline whose shape depends on the account's control
//! tags:
//!
//! ```text
//! transition ─┬─ invoicing off/draft ──→ BlockingStateChange            (end)
//!             └─ invoice run ─┬─ nothing to bill ─→ EmptyInvoice        (end)
//!                             └─ InvoiceCreated ─┬─ owed <= 0 / pay off (end)
//!                                                └─ payment attempt ─→ Payment* (end)
//! ```
//!
//! [`decide`] recognises the last event of each branch so a waiter completes
//! as soon as no further event can arrive.

use billflow_core::ControlTagSet;
use billflow_events::DomainEvent;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The pipeline has settled for this command.
    Complete,
    /// More events are expected.
    KeepWaiting,
}

impl Decision {
    pub fn is_complete(self) -> bool {
        matches!(self, Decision::Complete)
    }
}

/// Decide whether `event` ends the pipeline for an account with `tags`.
pub fn decide(tags: &ControlTagSet, event: &DomainEvent) -> Decision {
    let complete = match event {
        DomainEvent::SubscriptionTransition { .. } => false,
        DomainEvent::BlockingStateChange { .. } => tags.invoicing_suppressed(),
        DomainEvent::EmptyInvoice => true,
        DomainEvent::InvoiceCreated { amount_owed, .. } => *amount_owed <= 0 || tags.auto_pay_off(),
        DomainEvent::PaymentInfo { .. }
        | DomainEvent::PaymentError { .. }
        | DomainEvent::PaymentPluginError { .. }
        | DomainEvent::InvoicePaymentInfo { .. }
        | DomainEvent::InvoicePaymentError { .. } => true,
    };

    if complete {
        Decision::Complete
    } else {
        Decision::KeepWaiting
    }
}
