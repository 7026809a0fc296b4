//! One-shot completion waiter.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use billflow_core::{ControlTagSet, CorrelationToken};
use billflow_events::DomainEvent;

use super::policy::{self, Decision};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WaiterState {
    Armed,
    Completed,
}

/// Result of feeding one event to a waiter.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// No live waiter for the event's token.
    NoWaiter,
    /// The event did not settle the pipeline.
    Pending,
    /// The event moved the waiter to `Completed`.
    Completed,
    /// The waiter had already completed; the event was ignored.
    AlreadyCompleted,
}

/// Result of [`CompletionWaiter::wait`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WaitResult {
    Completed,
    TimedOut,
}

/// Bridges a blocked request to the asynchronous end of its billing pipeline.
///
/// The state lives in a `watch` channel, so the signal is level-triggered: a
/// completion that happens before anyone calls [`wait`](Self::wait) is still
/// observed. `Armed → Completed` happens at most once.
#[derive(Debug)]
pub struct CompletionWaiter {
    token: CorrelationToken,
    tags: ControlTagSet,
    signal: watch::Sender<WaiterState>,
}

impl CompletionWaiter {
    pub fn new(token: CorrelationToken, tags: ControlTagSet) -> Self {
        let (signal, _rx) = watch::channel(WaiterState::Armed);
        Self { token, tags, signal }
    }

    pub fn token(&self) -> CorrelationToken {
        self.token
    }

    pub fn tags(&self) -> ControlTagSet {
        self.tags
    }

    pub fn state(&self) -> WaiterState {
        *self.signal.borrow()
    }

    pub fn is_completed(&self) -> bool {
        self.state() == WaiterState::Completed
    }

    /// Feed an event through the completion policy.
    pub fn on_event(&self, event: &DomainEvent) -> Delivery {
        match policy::decide(&self.tags, event) {
            Decision::KeepWaiting => {
                debug!(token = %self.token, kind = %event.kind(), "event does not settle pipeline");
                Delivery::Pending
            }
            Decision::Complete if self.complete() => {
                info!(token = %self.token, kind = %event.kind(), "pipeline settled");
                Delivery::Completed
            }
            Decision::Complete => Delivery::AlreadyCompleted,
        }
    }

    /// Move to `Completed`. Returns `false` if that already happened.
    pub fn complete(&self) -> bool {
        self.signal.send_if_modified(|state| match state {
            WaiterState::Armed => {
                *state = WaiterState::Completed;
                true
            }
            WaiterState::Completed => false,
        })
    }

    /// Wait until completed or until `timeout` elapses.
    ///
    /// A timeout leaves the state untouched.
    pub async fn wait(&self, timeout: Duration) -> WaitResult {
        let mut rx = self.signal.subscribe();
        let completed = tokio::time::timeout(
            timeout,
            rx.wait_for(|state| *state == WaiterState::Completed),
        )
        .await;

        match completed {
            Ok(Ok(_)) => WaitResult::Completed,
            // The sender lives in `self`, so the channel cannot close while we wait.
            Ok(Err(_)) | Err(_) => WaitResult::TimedOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use billflow_core::{ControlTag, InvoiceId, PaymentId};

    fn invoice(amount_owed: i64) -> DomainEvent {
        DomainEvent::InvoiceCreated {
            invoice_id: InvoiceId::new(),
            amount_owed,
        }
    }

    fn payment() -> DomainEvent {
        DomainEvent::PaymentInfo {
            payment_id: PaymentId::new(),
            invoice_id: None,
            amount: 10,
        }
    }

    #[test]
    fn auto_pay_off_completes_on_invoice() {
        let tags = ControlTagSet::empty().with(ControlTag::AutoPayOff);
        let waiter = CompletionWaiter::new(CorrelationToken::new(), tags);

        assert_eq!(waiter.on_event(&invoice(10)), Delivery::Completed);
        assert!(waiter.is_completed());
    }

    #[test]
    fn invoice_with_balance_needs_payment() {
        let waiter = CompletionWaiter::new(CorrelationToken::new(), ControlTagSet::empty());

        assert_eq!(waiter.on_event(&invoice(10)), Delivery::Pending);
        assert_eq!(waiter.state(), WaiterState::Armed);

        assert_eq!(waiter.on_event(&payment()), Delivery::Completed);
        assert_eq!(waiter.state(), WaiterState::Completed);
    }

    #[test]
    fn completion_happens_once() {
        let waiter = CompletionWaiter::new(CorrelationToken::new(), ControlTagSet::empty());

        assert!(waiter.complete());
        assert!(!waiter.complete());
        assert_eq!(waiter.on_event(&DomainEvent::EmptyInvoice), Delivery::AlreadyCompleted);
    }

    #[tokio::test]
    async fn completion_before_wait_is_not_lost() {
        let waiter = CompletionWaiter::new(CorrelationToken::new(), ControlTagSet::empty());
        waiter.on_event(&DomainEvent::EmptyInvoice);

        assert_eq!(waiter.wait(Duration::ZERO).await, WaitResult::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_leaves_waiter_armed() {
        let waiter = CompletionWaiter::new(CorrelationToken::new(), ControlTagSet::empty());

        assert_eq!(waiter.wait(Duration::from_secs(3)).await, WaitResult::TimedOut);
        assert_eq!(waiter.state(), WaiterState::Armed);
    }

    #[tokio::test]
    async fn completion_from_another_thread_wakes_waiter() {
        let waiter = Arc::new(CompletionWaiter::new(CorrelationToken::new(), ControlTagSet::empty()));

        let remote = waiter.clone();
        let feeder = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.on_event(&payment())
        });

        assert_eq!(waiter.wait(Duration::from_secs(5)).await, WaitResult::Completed);
        assert_eq!(feeder.join().unwrap(), Delivery::Completed);
    }
}
