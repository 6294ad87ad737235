use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;

use crate::circuit_breaker::CircuitStatus;
use crate::client::ProviderClient;
use crate::data_source::{ClientError, FetchError, LiveOptions, MarketDataSource, Payload};
use crate::http_client::HttpRequest;
use crate::{validate_calendar_date, EquityQuote, ProviderId, Symbol, UtcDateTime};

use super::{invalid_payload, parse_decimal, rejected, upstream_rejection};

pub(super) const DEFAULT_BASE_URL: &str = "https://www.alphavantage.co";

/// Equities slot backed by Alpha Vantage `GLOBAL_QUOTE`.
///
/// The free tier answers throttling and bad symbols with HTTP 200 and a
/// `Note`, `Information` or `Error Message` body; those are mapped to
/// upstream rejections instead of decode failures.
#[derive(Debug)]
pub struct AlphaVantageAdapter {
    client: ProviderClient,
}

impl AlphaVantageAdapter {
    pub fn new(client: ProviderClient) -> Self {
        Self { client }
    }

    async fn fetch_quote(&self, symbol: Symbol, api_key: &str) -> Result<EquityQuote, ClientError> {
        let request = HttpRequest::get(self.client.endpoint("query")).with_query([
            ("function", "GLOBAL_QUOTE"),
            ("symbol", symbol.as_str()),
            ("apikey", api_key),
        ]);

        let response: GlobalQuoteResponse = self.client.get_json(request).await?;
        normalize_quote(symbol, response)
    }
}

impl MarketDataSource for AlphaVantageAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Equities
    }

    fn fetch<'a>(
        &'a self,
        options: &'a LiveOptions,
    ) -> Pin<Box<dyn Future<Output = Result<Payload, FetchError>> + Send + 'a>> {
        Box::pin(async move {
            let symbol = Symbol::parse(&options.equity_symbol).map_err(rejected)?;
            let api_key = self.client.require_api_key().map_err(rejected)?;

            let quote = self
                .client
                .call(1, || self.fetch_quote(symbol, api_key))
                .await?;
            Ok(Payload::Equities(quote))
        })
    }

    fn circuit_breaker_status(&self) -> CircuitStatus {
        self.client.circuit_breaker_status()
    }
}

#[derive(Debug, Deserialize)]
struct GlobalQuoteResponse {
    #[serde(rename = "Global Quote")]
    quote: Option<GlobalQuote>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GlobalQuote {
    #[serde(rename = "01. symbol")]
    symbol: Option<String>,
    #[serde(rename = "02. open")]
    open: Option<String>,
    #[serde(rename = "03. high")]
    high: Option<String>,
    #[serde(rename = "04. low")]
    low: Option<String>,
    #[serde(rename = "05. price")]
    price: Option<String>,
    #[serde(rename = "06. volume")]
    volume: Option<String>,
    #[serde(rename = "07. latest trading day")]
    latest_trading_day: Option<String>,
    #[serde(rename = "08. previous close")]
    previous_close: Option<String>,
}

fn normalize_quote(requested: Symbol, response: GlobalQuoteResponse) -> Result<EquityQuote, ClientError> {
    const PROVIDER: ProviderId = ProviderId::Equities;

    if let Some(message) = response.error_message {
        return Err(upstream_rejection(PROVIDER, message));
    }
    if let Some(message) = response.note.or(response.information) {
        return Err(upstream_rejection(PROVIDER, message));
    }

    // An unknown symbol comes back as an empty "Global Quote" object.
    let quote = response
        .quote
        .filter(|quote| quote.symbol.is_some())
        .ok_or_else(|| upstream_rejection(PROVIDER, format!("no quote for '{requested}'")))?;

    let field = |name: &str, value: &Option<String>| -> Result<f64, ClientError> {
        let raw = value
            .as_deref()
            .ok_or_else(|| ClientError::malformed(format!("{PROVIDER} quote is missing '{name}'")))?;
        parse_decimal(PROVIDER, name, raw)
    };

    let price = field("05. price", &quote.price)?;
    let open = field("02. open", &quote.open)?;
    let high = field("03. high", &quote.high)?;
    let low = field("04. low", &quote.low)?;
    let previous_close = field("08. previous close", &quote.previous_close)?;
    let volume = quote
        .volume
        .as_deref()
        .and_then(|raw| raw.trim().parse::<u64>().ok());
    let trading_day = quote
        .latest_trading_day
        .as_deref()
        .ok_or_else(|| ClientError::malformed(format!("{PROVIDER} quote has no trading day")))
        .and_then(|raw| validate_calendar_date(raw).map_err(|e| invalid_payload(PROVIDER, e)))?;

    EquityQuote::new(
        requested,
        price,
        open,
        high,
        low,
        previous_close,
        volume,
        trading_day,
        UtcDateTime::now(),
    )
    .map_err(|e| invalid_payload(PROVIDER, e))
}
