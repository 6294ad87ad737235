//! # Domain Models
//!
//! Normalized payloads for the six aggregate slots. Every adapter maps its
//! provider's wire format into these types so the aggregation layer never sees
//! provider-specific shapes.
//!
//! | Type | Slot |
//! |------|------|
//! | [`EquityQuote`] | equities |
//! | [`CryptoPrices`] | crypto |
//! | [`ForexRates`] | forex |
//! | [`NewsDigest`] | news |
//! | [`EconomicSeries`] | economic |
//! | [`QuoteBatch`] | quotes |
//!
//! Constructors validate numeric invariants (finite, non-negative prices,
//! ISO currency codes) and return [`ValidationError`](crate::ValidationError)
//! on violation.

mod models;
mod symbol;
mod timestamp;

pub use models::{
    validate_currency_code, CryptoPrice, CryptoPrices, EconomicObservation, EconomicSeries,
    EquityQuote, ForexRates, NewsArticle, NewsDigest, Quote, QuoteBatch,
};
pub use symbol::Symbol;
pub use timestamp::{validate_calendar_date, UtcDateTime};
