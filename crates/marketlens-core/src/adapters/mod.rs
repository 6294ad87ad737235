//! Provider adapters, one per aggregate slot.
//!
//! | Adapter | Provider | Upstream |
//! |---------|----------|----------|
//! | [`AlphaVantageAdapter`] | equities | Alpha Vantage `GLOBAL_QUOTE` |
//! | [`CoinGeckoAdapter`] | crypto | CoinGecko `simple/price` |
//! | [`ExchangeRateAdapter`] | forex | ExchangeRate-API `v6/{key}/latest/{base}` |
//! | [`NewsApiAdapter`] | news | NewsAPI `v2/everything` |
//! | [`FredAdapter`] | economic | FRED `series/observations` |
//! | [`FinnhubAdapter`] | quotes | Finnhub `quote` |
//!
//! Parameter problems are rejected before the circuit breaker is consulted, so
//! they never count as provider failures.

mod alphavantage;
mod coingecko;
mod exchangerate;
mod finnhub;
mod fred;
mod newsapi;

pub use alphavantage::AlphaVantageAdapter;
pub use coingecko::CoinGeckoAdapter;
pub use exchangerate::ExchangeRateAdapter;
pub use finnhub::FinnhubAdapter;
pub use fred::FredAdapter;
pub use newsapi::NewsApiAdapter;

use std::sync::Arc;

use crate::client::ProviderClient;
use crate::data_source::{ClientError, ClientErrorKind, FetchError, MarketDataSource};
use crate::circuit_breaker::BreakerError;
use crate::{ProviderId, ValidationError};

/// Default upstream base URL of each provider.
pub const fn default_base_url(provider: ProviderId) -> &'static str {
    match provider {
        ProviderId::Equities => alphavantage::DEFAULT_BASE_URL,
        ProviderId::Crypto => coingecko::DEFAULT_BASE_URL,
        ProviderId::Forex => exchangerate::DEFAULT_BASE_URL,
        ProviderId::News => newsapi::DEFAULT_BASE_URL,
        ProviderId::Economic => fred::DEFAULT_BASE_URL,
        ProviderId::Quotes => finnhub::DEFAULT_BASE_URL,
    }
}

/// Wraps a configured client in the adapter for its provider.
pub fn adapter_for(client: ProviderClient) -> Arc<dyn MarketDataSource> {
    match client.provider() {
        ProviderId::Equities => Arc::new(AlphaVantageAdapter::new(client)),
        ProviderId::Crypto => Arc::new(CoinGeckoAdapter::new(client)),
        ProviderId::Forex => Arc::new(ExchangeRateAdapter::new(client)),
        ProviderId::News => Arc::new(NewsApiAdapter::new(client)),
        ProviderId::Economic => Arc::new(FredAdapter::new(client)),
        ProviderId::Quotes => Arc::new(FinnhubAdapter::new(client)),
    }
}

/// Local parameter rejection, surfaced before the breaker.
fn rejected(error: impl Into<ClientError>) -> FetchError {
    BreakerError::Inner(error.into())
}

/// The provider answered, but its data violates a domain invariant.
fn invalid_payload(provider: ProviderId, error: ValidationError) -> ClientError {
    ClientError::malformed(format!("{provider} returned invalid data: {error}"))
}

/// An error reported inside a 200 body that blames the request.
fn upstream_rejection(provider: ProviderId, message: impl std::fmt::Display) -> ClientError {
    ClientError::new(
        ClientErrorKind::Upstream4xx,
        format!("{provider} rejected the request: {message}"),
    )
}

fn parse_decimal(provider: ProviderId, field: &str, raw: &str) -> Result<f64, ClientError> {
    raw.trim()
        .trim_end_matches('%')
        .parse::<f64>()
        .map_err(|_| ClientError::malformed(format!("{provider} field '{field}' is not numeric: '{raw}'")))
}
