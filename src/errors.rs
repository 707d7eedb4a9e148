//! Component-boundary error kinds.
//!
//! Internal, per-component failures propagate as `anyhow::Result` with `.context(...)` the way
//! the rest of this codebase already does. These types are reserved for the handful of kinds
//! that cross a component boundary and therefore need a stable tag a caller can match on,
//! per the propagation policy: result objects at the seams, exceptions-as-control-flow nowhere.

use thiserror::Error;

/// Failures the DataFabric can report back to a caller after exhausting failover.
#[derive(Debug, Error)]
pub enum DataFabricError {
    #[error("no source returned usable data for {ticker}")]
    NoData { ticker: String },
    #[error("validation failed for {ticker}: {reason}")]
    ValidationFailed { ticker: String, reason: String },
}

/// Broker-facing failures. `AuthFailure` and `ValidationFailure` are never retried by the
/// caller; `Transient` is retried locally with backoff before it ever reaches this type.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker authentication failed: {0}")]
    AuthFailure(String),
    #[error("broker rejected order: {0}")]
    OrderRejected(String),
    #[error("transient broker failure: {0}")]
    Transient(String),
}

/// Raised only at process startup; a missing or malformed configuration value is fatal and is
/// never recovered from mid-run.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration key: {0}")]
    Missing(String),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
    #[error("unknown configuration key in trading_config.toml: {0}")]
    UnknownKey(String),
}
