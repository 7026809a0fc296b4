//! Billing events and the bus that carries them.
//!
//! Every event published by the billing pipeline travels inside an
//! [`EventEnvelope`] stamped with the [`CorrelationToken`](billflow_core::CorrelationToken)
//! of the command that caused it.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::{DomainEvent, EventKind, TransitionType};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};

/// The envelope type published on the billing bus.
pub type BillingEnvelope = EventEnvelope<DomainEvent>;
