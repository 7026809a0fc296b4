use std::io;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

use tracing::{debug, info};

use billflow_events::{BillingEnvelope, EventBus, Subscription};

use super::registry::CompletionRegistry;

/// Everything the listener thread reacts to, on one channel.
enum Signal {
    Event(BillingEnvelope),
    Stop,
}

/// Handle to stop and join the listener thread.
#[derive(Debug)]
pub struct ListenerHandle {
    signals: mpsc::Sender<Signal>,
    join: Option<thread::JoinHandle<()>>,
}

impl ListenerHandle {
    /// Request shutdown and wait for the thread to stop.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        // The listener blocks on the same channel, so it wakes immediately.
        let _ = self.signals.send(Signal::Stop);
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Routes every billing event on the bus to the waiter registered under its
/// correlation token.
///
/// - A forwarding thread moves bus events onto the listener's signal channel
/// - The listener thread dispatches them and stops on the first `Stop`
/// - Events for unknown tokens are dropped
#[derive(Debug)]
pub struct CompletionListener;

impl CompletionListener {
    pub fn spawn<B>(bus: B, registry: Arc<CompletionRegistry>) -> io::Result<ListenerHandle>
    where
        B: EventBus<BillingEnvelope>,
    {
        let (signals_tx, signals_rx) = mpsc::channel::<Signal>();
        let sub = bus.subscribe();

        let forward_tx = signals_tx.clone();
        thread::Builder::new()
            .name("completion-forwarder".to_string())
            .spawn(move || forward(sub, forward_tx))?;

        let join = thread::Builder::new()
            .name("completion-listener".to_string())
            .spawn(move || listen(signals_rx, &registry))?;

        info!("completion listener started");
        Ok(ListenerHandle {
            signals: signals_tx,
            join: Some(join),
        })
    }
}

/// Exits when the bus goes away or the listener has stopped.
fn forward(sub: Subscription<BillingEnvelope>, signals: mpsc::Sender<Signal>) {
    while let Ok(envelope) = sub.recv() {
        if signals.send(Signal::Event(envelope)).is_err() {
            break;
        }
    }
    debug!("completion forwarder stopped");
}

fn listen(signals: mpsc::Receiver<Signal>, registry: &CompletionRegistry) {
    while let Ok(Signal::Event(envelope)) = signals.recv() {
        let delivery = registry.dispatch(&envelope);
        debug!(
            token = %envelope.token(),
            kind = %envelope.payload().kind(),
            ?delivery,
            "event routed"
        );
    }
    info!("completion listener stopped");
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::completion::waiter::{CompletionWaiter, WaitResult};
    use billflow_core::{AccountId, ControlTagSet, CorrelationToken};
    use billflow_events::{DomainEvent, EventEnvelope, InMemoryEventBus};

    #[tokio::test]
    async fn events_on_the_bus_reach_registered_waiters() {
        let bus = Arc::new(InMemoryEventBus::<BillingEnvelope>::new());
        let registry = Arc::new(CompletionRegistry::new());
        let handle = CompletionListener::spawn(bus.clone(), registry.clone()).unwrap();

        let token = CorrelationToken::new();
        let waiter = Arc::new(CompletionWaiter::new(token, ControlTagSet::empty()));
        registry.register(waiter.clone()).unwrap();

        bus.publish(EventEnvelope::now(CorrelationToken::new(), AccountId::new(), DomainEvent::EmptyInvoice))
            .unwrap();
        bus.publish(EventEnvelope::now(token, AccountId::new(), DomainEvent::EmptyInvoice))
            .unwrap();

        assert_eq!(waiter.wait(Duration::from_secs(5)).await, WaitResult::Completed);
        handle.shutdown();
    }

    #[test]
    fn shutdown_returns_promptly() {
        let bus = Arc::new(InMemoryEventBus::<BillingEnvelope>::new());
        let handle = CompletionListener::spawn(bus.clone(), Arc::new(CompletionRegistry::new())).unwrap();
        assert_eq!(bus.subscriber_count(), 1);

        let started = Instant::now();
        handle.shutdown();
        assert!(started.elapsed() < Duration::from_millis(100), "took {:?}", started.elapsed());

        // The forwarder notices on its next event and drops the subscription,
        // which the bus prunes on a later publish.
        let deadline = Instant::now() + Duration::from_secs(2);
        while bus.subscriber_count() > 0 && Instant::now() < deadline {
            bus.publish(EventEnvelope::now(CorrelationToken::new(), AccountId::new(), DomainEvent::EmptyInvoice))
                .unwrap();
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn dropping_the_handle_does_not_wait_for_traffic() {
        let bus = Arc::new(InMemoryEventBus::<BillingEnvelope>::new());
        let handle = CompletionListener::spawn(bus.clone(), Arc::new(CompletionRegistry::new())).unwrap();

        let started = Instant::now();
        drop(handle);
        assert!(started.elapsed() < Duration::from_millis(100), "took {:?}", started.elapsed());
    }
}
