use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use billflow_core::{AccountId, CorrelationToken};

/// Envelope for an event published on the billing bus.
///
/// Notes:
/// - `token` is the correlation token of the inbound command that caused the
///   event; events emitted by background jobs carry a fresh token.
/// - `account_id` scopes the event to one billing account.
/// - `payload` is the kind-specific body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    token: CorrelationToken,
    account_id: AccountId,
    occurred_at: DateTime<Utc>,
    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        token: CorrelationToken,
        account_id: AccountId,
        occurred_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            token,
            account_id,
            occurred_at,
            payload,
        }
    }

    /// Envelope with a fresh event id, stamped now.
    pub fn now(token: CorrelationToken, account_id: AccountId, payload: E) -> Self {
        Self::new(Uuid::now_v7(), token, account_id, Utc::now(), payload)
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn token(&self) -> CorrelationToken {
        self.token
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}
