use std::collections::BTreeMap;
use std::future::Future;
use std::str::FromStr;

use futures::FutureExt;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// How the aggregator runs its fetches.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum FetchMode {
    /// One fetch at a time, in submission order.
    Sequential,
    /// Every fetch spawned up front.
    #[default]
    Parallel,
}

impl FetchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchMode::Sequential => "sequential",
            FetchMode::Parallel => "parallel",
        }
    }
}

impl FromStr for FetchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(FetchMode::Sequential),
            "parallel" => Ok(FetchMode::Parallel),
            other => Err(format!("unknown fetch mode: {other}")),
        }
    }
}

impl core::fmt::Display for FetchMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

type RunFn<T, E> = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<T, E>> + Send>;

/// A named, not-yet-started read against one backend.
///
/// The closure receives a cancellation token that fires when the run is
/// abandoned (sibling failure, interruption, or the aggregation being
/// dropped). Fetches that hold no cancellable resources may ignore it; their
/// task is aborted anyway.
pub struct FetchTask<T, E> {
    name: String,
    run: RunFn<T, E>,
}

impl<T, E> FetchTask<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Box::new(move |cancel| f(cancel).boxed()),
        }
    }
}

impl<T, E> FetchTask<T, E> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn into_parts(self) -> (String, RunFn<T, E>) {
        (self.name, self.run)
    }
}

impl<T, E> core::fmt::Debug for FetchTask<T, E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FetchTask").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Result of a run that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome<T> {
    /// Every fetch finished; values keyed by fetch name.
    Complete(BTreeMap<String, T>),
    /// The deadline elapsed first. Values already fetched are discarded.
    Unavailable { missing: Vec<String> },
}

impl<T> FetchOutcome<T> {
    pub fn into_complete(self) -> Option<BTreeMap<String, T>> {
        match self {
            FetchOutcome::Complete(values) => Some(values),
            FetchOutcome::Unavailable { .. } => None,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError<E> {
    /// A fetch returned an error; the rest were cancelled.
    #[error("fetch `{name}` failed: {error}")]
    Source { name: String, error: E },
    /// A fetch panicked or was aborted from outside.
    #[error("fetch `{name}` crashed")]
    Crashed { name: String },
    /// The run was interrupted while waiting on its fetches.
    #[error("fetch interrupted")]
    Interrupted,
    #[error("duplicate fetch name: {0}")]
    DuplicateName(String),
}
