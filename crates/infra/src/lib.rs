//! Infrastructure layer: completion bridge, fetch aggregation, configuration.

pub mod completion;
pub mod config;
pub mod fetch;
