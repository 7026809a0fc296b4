//! Event publishing/subscription abstraction (mechanics only).
//!
//! The billing pipeline (entitlement → invoice → payment) reports progress by
//! publishing [`EventEnvelope`](crate::EventEnvelope)s on a bus. Consumers are
//! decoupled from producers:
//!
//! ```text
//! Entitlement API ─┐
//! Invoice API ─────┼─→ EventBus ─→ Subscriptions
//! Payment API ─────┘                 ├─ CompletionListener (wakes waiting requests)
//!                                    └─ anything else (audit, notifications)
//! ```
//!
//! ## Delivery
//!
//! - **Broadcast**: every subscription receives every published message.
//! - **At-least-once**: consumers must tolerate duplicates. The completion
//!   layer does, because a waiter completes at most once.
//! - **No cross-publisher ordering**: two stages publishing concurrently may
//!   interleave arbitrarily.

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

/// A subscription to an event stream.
///
/// ```ignore
/// let subscription = bus.subscribe();
/// loop {
///     match subscription.recv_timeout(Duration::from_millis(250)) {
///         Ok(envelope) => registry.dispatch(&envelope),
///         Err(RecvTimeoutError::Timeout) => continue, // check for shutdown
///         Err(RecvTimeoutError::Disconnected) => break, // bus dropped
///     }
/// }
/// ```
///
/// Subscriptions are meant to be drained by a single thread.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Transport-agnostic pub/sub bus.
///
/// `publish` may fail (full queue, broken transport); producers decide whether
/// to retry. Implementations must be shareable across threads since the
/// pipeline stages publish from their own workers.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
