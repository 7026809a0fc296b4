//! Correlation registry: token → live waiter.
//!
//! Request tasks register and unregister waiters; the bus listener thread
//! dispatches events into them. The map is split into shards, each behind its
//! own lock, so traffic for unrelated tokens does not contend on one lock.
//! Every mutation of a key happens under its shard's write lock, so a dispatch
//! racing an unregister either sees the waiter or sees nothing.

use std::collections::HashMap;
use std::collections::hash_map::{DefaultHasher, Entry};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;
use tracing::{debug, trace};

use billflow_core::CorrelationToken;
use billflow_events::{DomainEvent, EventEnvelope};

use super::waiter::{CompletionWaiter, Delivery};

const SHARDS: usize = 16;

type Shard = RwLock<HashMap<CorrelationToken, Arc<CompletionWaiter>>>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("a waiter is already registered for token {0}")]
    AlreadyRegistered(CorrelationToken),
}

/// Process-wide table of live completion waiters.
///
/// Construct one per application and share it via `Arc`.
#[derive(Debug)]
pub struct CompletionRegistry {
    shards: Vec<Shard>,
}

impl CompletionRegistry {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, token: &CorrelationToken) -> &Shard {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    /// Register `waiter` under its token. Fails if the token is already taken.
    pub fn register(&self, waiter: Arc<CompletionWaiter>) -> Result<(), RegistryError> {
        let token = waiter.token();
        let mut map = self.shard(&token).write().unwrap_or_else(PoisonError::into_inner);
        match map.entry(token) {
            Entry::Occupied(_) => Err(RegistryError::AlreadyRegistered(token)),
            Entry::Vacant(slot) => {
                slot.insert(waiter);
                trace!(token = %token, "waiter registered");
                Ok(())
            }
        }
    }

    /// Remove the waiter for `token`, if any. Idempotent.
    pub fn unregister(&self, token: &CorrelationToken) -> Option<Arc<CompletionWaiter>> {
        let removed = self
            .shard(token)
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token);
        if removed.is_some() {
            trace!(token = %token, "waiter unregistered");
        }
        removed
    }

    /// Route an event to the waiter registered under its token.
    ///
    /// Events for unknown tokens (never registered, or already unregistered)
    /// are dropped.
    pub fn dispatch(&self, envelope: &EventEnvelope<DomainEvent>) -> Delivery {
        let token = envelope.token();
        let waiter = self
            .shard(&token)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&token)
            .cloned();

        match waiter {
            Some(w) => w.on_event(envelope.payload()),
            None => {
                debug!(token = %token, kind = %envelope.payload().kind(), "no waiter for event; dropped");
                Delivery::NoWaiter
            }
        }
    }

    pub fn contains(&self, token: &CorrelationToken) -> bool {
        self.shard(token)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(token)
    }

    /// Number of live waiters across all shards.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.read().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CompletionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
