//! Bounded fetch aggregator: several named reads under one deadline.

pub mod aggregator;
pub mod task;

pub use aggregator::{FetchAggregator, POLL_INTERVAL};
pub use task::{FetchError, FetchMode, FetchOutcome, FetchTask};
