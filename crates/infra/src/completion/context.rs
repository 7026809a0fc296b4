use tokio_util::sync::CancellationToken;

use billflow_core::{AccountId, CorrelationToken};

/// Per-request call context.
///
/// Carries the correlation token stamped on every event the request causes,
/// the audit fields supplied by the caller, the account the command targets
/// (needed to snapshot control tags) and an interrupt signal that aborts any
/// wait performed on the request's behalf.
#[derive(Debug, Clone)]
pub struct CallContext {
    token: CorrelationToken,
    account_id: Option<AccountId>,
    created_by: Option<String>,
    reason: Option<String>,
    comment: Option<String>,
    interrupt: CancellationToken,
}

impl CallContext {
    pub fn new(token: CorrelationToken) -> Self {
        Self {
            token,
            account_id: None,
            created_by: None,
            reason: None,
            comment: None,
            interrupt: CancellationToken::new(),
        }
    }

    pub fn with_account(mut self, account_id: AccountId) -> Self {
        self.account_id = Some(account_id);
        self
    }

    pub fn with_audit(
        mut self,
        created_by: Option<String>,
        reason: Option<String>,
        comment: Option<String>,
    ) -> Self {
        self.created_by = created_by;
        self.reason = reason;
        self.comment = comment;
        self
    }

    /// Tie this context's interrupt signal to `parent` (e.g. server shutdown).
    pub fn with_interrupt(mut self, interrupt: CancellationToken) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn token(&self) -> CorrelationToken {
        self.token
    }

    pub fn account_id(&self) -> Option<AccountId> {
        self.account_id
    }

    pub fn created_by(&self) -> Option<&str> {
        self.created_by.as_deref()
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn interrupt(&self) -> &CancellationToken {
        &self.interrupt
    }
}
