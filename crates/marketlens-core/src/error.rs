use thiserror::Error;

use crate::config::ConfigError;

/// Validation and contract errors exposed by `marketlens-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("symbol cannot be empty")]
    EmptySymbol,
    #[error("symbol length {len} exceeds max {max}")]
    SymbolTooLong { len: usize, max: usize },
    #[error("symbol must start with an ASCII letter or '^': '{ch}'")]
    SymbolInvalidStart { ch: char },
    #[error("symbol contains invalid character '{ch}' at index {index}")]
    SymbolInvalidChar { ch: char, index: usize },

    #[error(
        "invalid provider '{value}', expected one of equities, crypto, forex, news, economic, quotes"
    )]
    InvalidProvider { value: String },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },
    #[error("date must be formatted as YYYY-MM-DD: '{value}'")]
    InvalidDate { value: String },
    #[error("unix timestamp {value} is out of range")]
    TimestampOutOfRange { value: i64 },

    #[error("currency must be a 3-letter ISO code: '{value}'")]
    InvalidCurrency { value: String },

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
    #[error("field '{field}' must be non-negative")]
    NegativeValue { field: &'static str },
    #[error("field '{field}' must not be empty")]
    EmptyField { field: &'static str },
    #[error("field '{field}' must be between 1 and {max}, got {value}")]
    LimitOutOfRange {
        field: &'static str,
        value: usize,
        max: usize,
    },

    #[error("provider '{provider}' is registered more than once")]
    DuplicateProvider { provider: &'static str },
    #[error("no adapter registered for provider '{provider}'")]
    MissingProvider { provider: &'static str },
}

/// Top-level error type for core operations that can fail outright.
///
/// Provider and cache failures never surface here; they are folded into the
/// aggregate envelope or degraded by the cache backend.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
