use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use tokio::task::{Id, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::task::{FetchError, FetchMode, FetchOutcome, FetchTask};

/// Length of one wait on the pending set.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Cancels the run's scope token when the run ends, however it ends.
struct ScopeGuard(CancellationToken);

impl ScopeGuard {
    fn token(&self) -> CancellationToken {
        self.0.clone()
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Runs a set of named fetches under one deadline.
///
/// ```text
/// Parallel:   spawn all ─→ wait ≤ 100ms on pending ─┬─ all done      → Complete
///                          ↑                        ├─ one failed    → cancel rest, Err
///                          └──── still pending ─────┼─ deadline      → cancel rest, Unavailable
///                                                   └─ interrupted   → cancel rest, Err
/// ```
///
/// Sequential mode runs the same fetches one by one and yields the same map.
#[derive(Debug, Clone)]
pub struct FetchAggregator {
    mode: FetchMode,
    deadline: Duration,
}

impl FetchAggregator {
    pub fn new(mode: FetchMode, deadline: Duration) -> Self {
        Self { mode, deadline }
    }

    pub async fn run<T, E>(
        &self,
        tasks: Vec<FetchTask<T, E>>,
        interrupt: &CancellationToken,
    ) -> Result<FetchOutcome<T>, FetchError<E>>
    where
        T: Send + 'static,
        E: Send + 'static,
    {
        let mut names = HashSet::with_capacity(tasks.len());
        for task in &tasks {
            if !names.insert(task.name()) {
                return Err(FetchError::DuplicateName(task.name().to_string()));
            }
        }

        debug!(mode = %self.mode, fetches = tasks.len(), deadline_ms = self.deadline.as_millis() as u64, "fetch run started");
        match self.mode {
            FetchMode::Sequential => self.run_sequential(tasks, interrupt).await,
            FetchMode::Parallel => self.run_parallel(tasks, interrupt).await,
        }
    }

    async fn run_sequential<T, E>(
        &self,
        tasks: Vec<FetchTask<T, E>>,
        interrupt: &CancellationToken,
    ) -> Result<FetchOutcome<T>, FetchError<E>>
    where
        T: Send + 'static,
        E: Send + 'static,
    {
        let started = Instant::now();
        let scope = ScopeGuard(interrupt.child_token());
        let mut values = BTreeMap::new();
        let mut queue = tasks.into_iter();

        while let Some(task) = queue.next() {
            let (name, run) = task.into_parts();
            let remaining = self.deadline.saturating_sub(started.elapsed());

            let result = tokio::select! {
                biased;
                _ = interrupt.cancelled() => {
                    warn!(fetch = %name, "fetch run interrupted");
                    return Err(FetchError::Interrupted);
                }
                r = tokio::time::timeout(remaining, run(scope.token())) => r,
            };

            match result {
                Ok(Ok(value)) => {
                    values.insert(name, value);
                }
                Ok(Err(error)) => {
                    warn!(fetch = %name, "fetch failed");
                    return Err(FetchError::Source { name, error });
                }
                Err(_) => {
                    let mut missing: Vec<String> = std::iter::once(name)
                        .chain(queue.map(|t| t.name().to_string()))
                        .collect();
                    missing.sort();
                    warn!(?missing, "fetch deadline elapsed");
                    return Ok(FetchOutcome::Unavailable { missing });
                }
            }
        }

        Ok(FetchOutcome::Complete(values))
    }

    async fn run_parallel<T, E>(
        &self,
        tasks: Vec<FetchTask<T, E>>,
        interrupt: &CancellationToken,
    ) -> Result<FetchOutcome<T>, FetchError<E>>
    where
        T: Send + 'static,
        E: Send + 'static,
    {
        let started = Instant::now();
        let scope = ScopeGuard(interrupt.child_token());
        // Dropping the set aborts whatever is still running.
        let mut set = JoinSet::new();
        let mut pending: HashMap<Id, String> = HashMap::with_capacity(tasks.len());

        for task in tasks {
            let (name, run) = task.into_parts();
            let handle = set.spawn(run(scope.token()));
            pending.insert(handle.id(), name);
        }

        let mut values = BTreeMap::new();
        loop {
            let remaining = self.deadline.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                let mut missing: Vec<String> = pending.into_values().collect();
                missing.sort();
                warn!(?missing, "fetch deadline elapsed; cancelling the rest");
                return Ok(FetchOutcome::Unavailable { missing });
            }

            let attempt = POLL_INTERVAL.min(remaining);
            let joined = tokio::select! {
                biased;
                _ = interrupt.cancelled() => {
                    warn!(pending = pending.len(), "fetch run interrupted; cancelling the rest");
                    return Err(FetchError::Interrupted);
                }
                joined = tokio::time::timeout(attempt, set.join_next_with_id()) => joined,
            };

            match joined {
                Err(_) => trace!(pending = pending.len(), "fetch attempt elapsed"),
                Ok(None) => {
                    debug!(fetches = values.len(), "fetch run complete");
                    return Ok(FetchOutcome::Complete(values));
                }
                Ok(Some(Ok((id, result)))) => {
                    let name = pending.remove(&id).unwrap_or_default();
                    match result {
                        Ok(value) => {
                            trace!(fetch = %name, "fetch done");
                            values.insert(name, value);
                        }
                        Err(error) => {
                            warn!(fetch = %name, pending = pending.len(), "fetch failed; cancelling the rest");
                            return Err(FetchError::Source { name, error });
                        }
                    }
                }
                Ok(Some(Err(join_error))) => {
                    let name = pending.remove(&join_error.id()).unwrap_or_default();
                    warn!(fetch = %name, error = %join_error, "fetch crashed; cancelling the rest");
                    return Err(FetchError::Crashed { name });
                }
            }
        }
    }
}
