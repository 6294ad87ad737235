//! Provider adapter contract and the error taxonomy shared by all adapters.
//!
//! Every adapter implements [`MarketDataSource`]: one logical `fetch` per
//! aggregation pass, mediated by the adapter's own circuit breaker.
//!
//! # Failure taxonomy
//!
//! | Kind | Sent upstream | Counted by breaker | Retried |
//! |------|---------------|--------------------|---------|
//! | `Timeout` | yes | yes | yes |
//! | `Network` | yes | yes | yes |
//! | `Upstream5xx` | yes | yes | yes |
//! | `Upstream4xx` | yes | yes | only 408 / 429 |
//! | `MalformedResponse` | yes | yes | no |
//! | `InvalidRequest` | no | no | no |
//! | `RateLimited` | no | no | no |

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::circuit_breaker::{BreakerError, CircuitStatus};
use crate::http_client::{HttpError, HttpErrorKind};
use crate::{
    validate_currency_code, CryptoPrices, EconomicSeries, EquityQuote, ForexRates, NewsDigest,
    ProviderId, QuoteBatch, Symbol, ValidationError,
};

pub const MAX_NEWS_LIMIT: usize = 100;
pub const MAX_ECONOMIC_LIMIT: usize = 1_000;

/// Client-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientErrorKind {
    Timeout,
    Network,
    MalformedResponse,
    #[serde(rename = "upstream_4xx")]
    Upstream4xx,
    #[serde(rename = "upstream_5xx")]
    Upstream5xx,
    InvalidRequest,
    RateLimited,
}

impl ClientErrorKind {
    pub const fn code(self) -> &'static str {
        match self {
            Self::Timeout => "client.timeout",
            Self::Network => "client.network",
            Self::MalformedResponse => "client.malformed_response",
            Self::Upstream4xx => "client.upstream_4xx",
            Self::Upstream5xx => "client.upstream_5xx",
            Self::InvalidRequest => "client.invalid_request",
            Self::RateLimited => "client.rate_limited",
        }
    }

    /// Local rejections never reach the provider and must not trip the breaker.
    pub const fn is_local(self) -> bool {
        matches!(self, Self::InvalidRequest | Self::RateLimited)
    }
}

/// Structured provider client error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientError {
    kind: ClientErrorKind,
    message: String,
    status: Option<u16>,
}

impl ClientError {
    pub fn new(kind: ClientErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::Timeout, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::Network, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::MalformedResponse, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::InvalidRequest, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::RateLimited, message)
    }

    /// Classifies a non-success HTTP status.
    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        let kind = if status >= 500 {
            ClientErrorKind::Upstream5xx
        } else {
            ClientErrorKind::Upstream4xx
        };
        Self {
            kind,
            message: message.into(),
            status: Some(status),
        }
    }

    pub const fn kind(&self) -> ClientErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn status(&self) -> Option<u16> {
        self.status
    }

    pub const fn retryable(&self) -> bool {
        match self.kind {
            ClientErrorKind::Timeout | ClientErrorKind::Network | ClientErrorKind::Upstream5xx => {
                true
            }
            ClientErrorKind::Upstream4xx => matches!(self.status, Some(408 | 429)),
            ClientErrorKind::MalformedResponse
            | ClientErrorKind::InvalidRequest
            | ClientErrorKind::RateLimited => false,
        }
    }

    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }
}

impl Display for ClientError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (HTTP {status}, {})", self.message, self.code()),
            None => write!(f, "{} ({})", self.message, self.code()),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<HttpError> for ClientError {
    fn from(error: HttpError) -> Self {
        match error.kind() {
            HttpErrorKind::Timeout => Self::timeout(error.message()),
            HttpErrorKind::Connect | HttpErrorKind::Body | HttpErrorKind::Other => {
                Self::network(error.message())
            }
        }
    }
}

impl From<ValidationError> for ClientError {
    fn from(error: ValidationError) -> Self {
        Self::invalid_request(error.to_string())
    }
}

/// Outcome of a failed adapter fetch: blocked by the breaker or failed in the client.
pub type FetchError = BreakerError<ClientError>;

impl From<ClientError> for FetchError {
    fn from(error: ClientError) -> Self {
        Self::Inner(error)
    }
}

/// Per-category parameters of one aggregation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveOptions {
    pub equity_symbol: String,
    pub crypto_ids: Vec<String>,
    pub vs_currency: String,
    pub forex_base: String,
    pub forex_symbols: Vec<String>,
    pub news_query: String,
    pub news_limit: usize,
    pub economic_series_id: String,
    pub economic_limit: usize,
    pub quote_symbols: Vec<String>,
}

impl Default for LiveOptions {
    fn default() -> Self {
        Self {
            equity_symbol: String::from("AAPL"),
            crypto_ids: vec![String::from("bitcoin"), String::from("ethereum")],
            vs_currency: String::from("usd"),
            forex_base: String::from("USD"),
            forex_symbols: vec![String::from("EUR"), String::from("GBP"), String::from("JPY")],
            news_query: String::from("stock market"),
            news_limit: 10,
            economic_series_id: String::from("GDP"),
            economic_limit: 12,
            quote_symbols: vec![String::from("AAPL"), String::from("MSFT"), String::from("GOOGL")],
        }
    }
}

impl LiveOptions {
    /// Checks every category's parameters up front.
    ///
    /// Adapters repeat their own slice of this check and reject bad input as
    /// `InvalidRequest`, so calling this is optional for library users.
    pub fn validate(&self) -> Result<(), ValidationError> {
        Symbol::parse(&self.equity_symbol)?;
        if self.crypto_ids.iter().all(|id| id.trim().is_empty()) {
            return Err(ValidationError::EmptyField {
                field: "crypto_ids",
            });
        }
        validate_currency_code(&self.vs_currency)?;
        validate_currency_code(&self.forex_base)?;
        for code in &self.forex_symbols {
            validate_currency_code(code)?;
        }
        if self.news_query.trim().is_empty() {
            return Err(ValidationError::EmptyField {
                field: "news_query",
            });
        }
        check_limit("news_limit", self.news_limit, MAX_NEWS_LIMIT)?;
        if self.economic_series_id.trim().is_empty() {
            return Err(ValidationError::EmptyField {
                field: "economic_series_id",
            });
        }
        check_limit("economic_limit", self.economic_limit, MAX_ECONOMIC_LIMIT)?;
        Symbol::parse_all(&self.quote_symbols)?;
        Ok(())
    }
}

pub(crate) fn check_limit(
    field: &'static str,
    value: usize,
    max: usize,
) -> Result<usize, ValidationError> {
    if value == 0 || value > max {
        return Err(ValidationError::LimitOutOfRange { field, value, max });
    }
    Ok(value)
}

/// Normalized result of one adapter fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", content = "data", rename_all = "lowercase")]
pub enum Payload {
    Equities(EquityQuote),
    Crypto(CryptoPrices),
    Forex(ForexRates),
    News(NewsDigest),
    Economic(EconomicSeries),
    Quotes(QuoteBatch),
}

impl Payload {
    pub const fn provider(&self) -> ProviderId {
        match self {
            Self::Equities(_) => ProviderId::Equities,
            Self::Crypto(_) => ProviderId::Crypto,
            Self::Forex(_) => ProviderId::Forex,
            Self::News(_) => ProviderId::News,
            Self::Economic(_) => ProviderId::Economic,
            Self::Quotes(_) => ProviderId::Quotes,
        }
    }
}

/// Provider adapter contract.
///
/// Implementations must be `Send + Sync`; the aggregation service holds them
/// behind `Arc` and polls all six fetches from one task.
pub trait MarketDataSource: Send + Sync {
    fn id(&self) -> ProviderId;

    /// One logical request for this provider's slice of `options`.
    ///
    /// Returns `BreakerError::Open` without touching the network while the
    /// provider's circuit is open.
    fn fetch<'a>(
        &'a self,
        options: &'a LiveOptions,
    ) -> Pin<Box<dyn Future<Output = Result<Payload, FetchError>> + Send + 'a>>;

    fn circuit_breaker_status(&self) -> CircuitStatus;
}
