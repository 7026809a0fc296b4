//! Synchronous completion bridge.
//!
//! Lets a request that triggered an asynchronous billing pipeline block until
//! the pipeline settles (invoice and payment done, or nothing to do), a
//! timeout elapses, or the request is interrupted.
//!
//! - [`CompletionWaiter`]: one-shot signal plus the completion policy
//! - [`CompletionRegistry`]: correlation token → live waiter
//! - [`CompletionListener`]: drains the bus into the registry
//! - [`CompletionCoordinator`]: wraps one command with register / run / wait / unregister

pub mod context;
pub mod coordinator;
pub mod listener;
pub mod operation;
pub mod policy;
pub mod registry;
pub mod waiter;

pub use context::CallContext;
pub use coordinator::{
    CompletionCoordinator, CompletionError, CompletionOutcome, ControlTagLookup, DEFAULT_MAX_WAIT,
};
pub use listener::{CompletionListener, ListenerHandle};
pub use operation::{EffectTiming, Executed};
pub use policy::{Decision, decide};
pub use registry::{CompletionRegistry, RegistryError};
pub use waiter::{CompletionWaiter, Delivery, WaitResult, WaiterState};
