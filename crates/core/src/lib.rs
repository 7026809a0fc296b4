//! `billflow-core`: shared billing primitives.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the domain error model, account control tags and the clock
//! abstraction used to reason about account-local dates.

pub mod clock;
pub mod error;
pub mod id;
pub mod tags;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use id::{AccountId, BundleId, CorrelationToken, InvoiceId, PaymentId, SubscriptionId};
pub use tags::{ControlTag, ControlTagSet};
