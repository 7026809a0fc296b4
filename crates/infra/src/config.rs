//! Configuration loading and representation.
//!
//! Everything comes from environment variables with working defaults, so a
//! bare `billflow-api` starts on port 8080 with parallel fetches.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use billflow_observability::LogFormat;

use crate::fetch::FetchMode;

pub const ENV_BIND_ADDR: &str = "BILLFLOW_BIND_ADDR";
pub const ENV_LOG_FORMAT: &str = "BILLFLOW_LOG_FORMAT";
pub const ENV_FETCH_MODE: &str = "BILLFLOW_FETCH_MODE";
pub const ENV_FETCH_DEADLINE_MS: &str = "BILLFLOW_FETCH_DEADLINE_MS";
pub const ENV_MAX_CALL_TIMEOUT_SECS: &str = "BILLFLOW_MAX_CALL_TIMEOUT_SECS";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(var: &'static str, reason: impl core::fmt::Display) -> Self {
        Self::Invalid {
            var,
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub log_format: LogFormat,
    pub fetch_mode: FetchMode,
    /// Global deadline for one aggregated read.
    pub fetch_deadline: Duration,
    /// Upper bound for the per-call `callTimeoutSec` parameter.
    pub max_call_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_format: LogFormat::Json,
            fetch_mode: FetchMode::Parallel,
            fetch_deadline: Duration::from_millis(2000),
            max_call_timeout: Duration::from_secs(60),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Ok(Self {
            bind_addr: parse(&lookup, ENV_BIND_ADDR)?.unwrap_or(defaults.bind_addr),
            log_format: parse(&lookup, ENV_LOG_FORMAT)?.unwrap_or(defaults.log_format),
            fetch_mode: parse(&lookup, ENV_FETCH_MODE)?.unwrap_or(defaults.fetch_mode),
            fetch_deadline: parse::<u64, _>(&lookup, ENV_FETCH_DEADLINE_MS)?
                .map(Duration::from_millis)
                .unwrap_or(defaults.fetch_deadline),
            max_call_timeout: parse::<u64, _>(&lookup, ENV_MAX_CALL_TIMEOUT_SECS)?
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_call_timeout),
        })
    }

    pub fn with_bind_addr(mut self, bind_addr: SocketAddr) -> Self {
        self.bind_addr = bind_addr;
        self
    }

    pub fn with_log_format(mut self, log_format: LogFormat) -> Self {
        self.log_format = log_format;
        self
    }

    pub fn with_fetch_mode(mut self, fetch_mode: FetchMode) -> Self {
        self.fetch_mode = fetch_mode;
        self
    }

    pub fn with_fetch_deadline(mut self, fetch_deadline: Duration) -> Self {
        self.fetch_deadline = fetch_deadline;
        self
    }

    pub fn with_max_call_timeout(mut self, max_call_timeout: Duration) -> Self {
        self.max_call_timeout = max_call_timeout;
        self
    }
}

fn parse<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::invalid(var, e)),
    }
}
