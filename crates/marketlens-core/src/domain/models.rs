use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Symbol, UtcDateTime, ValidationError};

/// Daily equity quote (equities slot).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityQuote {
    pub symbol: Symbol,
    pub price: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub previous_close: f64,
    pub change: f64,
    pub change_percent: f64,
    pub volume: Option<u64>,
    /// Exchange trading day the quote belongs to (`YYYY-MM-DD`).
    pub trading_day: String,
    pub as_of: UtcDateTime,
}

impl EquityQuote {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: Symbol,
        price: f64,
        open: f64,
        high: f64,
        low: f64,
        previous_close: f64,
        volume: Option<u64>,
        trading_day: String,
        as_of: UtcDateTime,
    ) -> Result<Self, ValidationError> {
        validate_non_negative("price", price)?;
        validate_non_negative("open", open)?;
        validate_non_negative("high", high)?;
        validate_non_negative("low", low)?;
        validate_non_negative("previous_close", previous_close)?;

        let change = price - previous_close;
        let change_percent = if previous_close > 0.0 {
            change / previous_close * 100.0
        } else {
            0.0
        };

        Ok(Self {
            symbol,
            price,
            open,
            high,
            low,
            previous_close,
            change,
            change_percent,
            volume,
            trading_day,
            as_of,
        })
    }
}

/// Spot price of one crypto asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CryptoPrice {
    /// Provider asset id, e.g. `bitcoin`.
    pub id: String,
    pub price: f64,
    pub market_cap: Option<f64>,
    pub change_24h_percent: Option<f64>,
    pub last_updated: Option<UtcDateTime>,
}

impl CryptoPrice {
    pub fn new(
        id: impl Into<String>,
        price: f64,
        market_cap: Option<f64>,
        change_24h_percent: Option<f64>,
        last_updated: Option<UtcDateTime>,
    ) -> Result<Self, ValidationError> {
        validate_non_negative("price", price)?;
        validate_optional_non_negative("market_cap", market_cap)?;
        validate_optional_finite("change_24h_percent", change_24h_percent)?;

        Ok(Self {
            id: id.into(),
            price,
            market_cap,
            change_24h_percent,
            last_updated,
        })
    }
}

/// Crypto slot: prices quoted in one fiat currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CryptoPrices {
    pub vs_currency: String,
    pub prices: Vec<CryptoPrice>,
}

/// Forex slot: conversion rates from one base currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForexRates {
    pub base: String,
    pub rates: BTreeMap<String, f64>,
    pub as_of: UtcDateTime,
}

impl ForexRates {
    pub fn new(
        base: &str,
        rates: BTreeMap<String, f64>,
        as_of: UtcDateTime,
    ) -> Result<Self, ValidationError> {
        if rates.is_empty() {
            return Err(ValidationError::EmptyField { field: "rates" });
        }
        let rates = rates
            .into_iter()
            .map(|(code, rate)| {
                validate_non_negative("rate", rate)?;
                Ok((validate_currency_code(&code)?, rate))
            })
            .collect::<Result<BTreeMap<_, _>, ValidationError>>()?;

        Ok(Self {
            base: validate_currency_code(base)?,
            rates,
            as_of,
        })
    }
}

/// One headline from the news provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsArticle {
    pub source: String,
    pub title: String,
    pub description: Option<String>,
    pub url: String,
    pub published_at: Option<UtcDateTime>,
}

/// News slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsDigest {
    pub query: String,
    pub total_results: u64,
    pub articles: Vec<NewsArticle>,
}

/// One dated value of an economic series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EconomicObservation {
    pub date: String,
    pub value: f64,
}

/// Economic slot, observations ordered newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EconomicSeries {
    pub series_id: String,
    pub observations: Vec<EconomicObservation>,
}

impl EconomicSeries {
    pub fn latest(&self) -> Option<&EconomicObservation> {
        self.observations.first()
    }
}

/// Real-time quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: Symbol,
    pub current: f64,
    pub change: Option<f64>,
    pub change_percent: Option<f64>,
    pub high: f64,
    pub low: f64,
    pub open: f64,
    pub previous_close: f64,
    pub as_of: UtcDateTime,
}

impl Quote {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: Symbol,
        current: f64,
        change: Option<f64>,
        change_percent: Option<f64>,
        high: f64,
        low: f64,
        open: f64,
        previous_close: f64,
        as_of: UtcDateTime,
    ) -> Result<Self, ValidationError> {
        validate_non_negative("current", current)?;
        validate_optional_finite("change", change)?;
        validate_optional_finite("change_percent", change_percent)?;
        validate_non_negative("high", high)?;
        validate_non_negative("low", low)?;
        validate_non_negative("open", open)?;
        validate_non_negative("previous_close", previous_close)?;

        Ok(Self {
            symbol,
            current,
            change,
            change_percent,
            high,
            low,
            open,
            previous_close,
            as_of,
        })
    }
}

/// Quotes slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteBatch {
    pub quotes: Vec<Quote>,
}

/// Validate and normalize currency to uppercase 3-letter code.
pub fn validate_currency_code(input: &str) -> Result<String, ValidationError> {
    let normalized = input.trim().to_ascii_uppercase();
    let is_valid = normalized.len() == 3 && normalized.chars().all(|ch| ch.is_ascii_alphabetic());

    if !is_valid {
        return Err(ValidationError::InvalidCurrency {
            value: input.to_owned(),
        });
    }

    Ok(normalized)
}

fn validate_non_negative(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFiniteValue { field });
    }
    if value < 0.0 {
        return Err(ValidationError::NegativeValue { field });
    }
    Ok(())
}

fn validate_optional_non_negative(
    field: &'static str,
    value: Option<f64>,
) -> Result<(), ValidationError> {
    value.map_or(Ok(()), |value| validate_non_negative(field, value))
}

fn validate_optional_finite(field: &'static str, value: Option<f64>) -> Result<(), ValidationError> {
    match value {
        Some(value) if !value.is_finite() => Err(ValidationError::NonFiniteValue { field }),
        _ => Ok(()),
    }
}
