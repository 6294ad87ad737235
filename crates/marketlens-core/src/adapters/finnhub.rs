use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

use futures::future::try_join_all;
use serde::Deserialize;

use crate::circuit_breaker::CircuitStatus;
use crate::client::ProviderClient;
use crate::data_source::{ClientError, FetchError, LiveOptions, MarketDataSource, Payload};
use crate::http_client::{HttpAuth, HttpRequest};
use crate::{ProviderId, Quote, QuoteBatch, Symbol, UtcDateTime};

use super::{invalid_payload, rejected, upstream_rejection};

pub(super) const DEFAULT_BASE_URL: &str = "https://finnhub.io/api/v1";

/// Quotes slot backed by Finnhub `quote`, one request per symbol.
///
/// All symbols form one logical fetch: they share a single breaker outcome and
/// one failed symbol fails the batch.
#[derive(Debug)]
pub struct FinnhubAdapter {
    client: ProviderClient,
}

impl FinnhubAdapter {
    pub fn new(client: ProviderClient) -> Self {
        Self { client }
    }

    async fn fetch_batch(&self, api_key: &str, symbols: Vec<Symbol>) -> Result<QuoteBatch, ClientError> {
        let quotes = try_join_all(
            symbols
                .into_iter()
                .map(|symbol| self.fetch_quote(api_key, symbol)),
        )
        .await?;
        Ok(QuoteBatch { quotes })
    }

    async fn fetch_quote(&self, api_key: &str, symbol: Symbol) -> Result<Quote, ClientError> {
        let request = HttpRequest::get(self.client.endpoint("quote"))
            .with_query([("symbol", symbol.as_str())])
            .with_auth(&HttpAuth::header("X-Finnhub-Token", api_key));

        let raw: RawQuote = self.client.get_json(request).await?;
        normalize_quote(symbol, raw)
    }
}

impl MarketDataSource for FinnhubAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Quotes
    }

    fn fetch<'a>(
        &'a self,
        options: &'a LiveOptions,
    ) -> Pin<Box<dyn Future<Output = Result<Payload, FetchError>> + Send + 'a>> {
        Box::pin(async move {
            let mut symbols = Symbol::parse_all(&options.quote_symbols).map_err(rejected)?;
            let mut seen = HashSet::new();
            symbols.retain(|symbol| seen.insert(symbol.clone()));
            let api_key = self.client.require_api_key().map_err(rejected)?;
            let cost = u32::try_from(symbols.len()).unwrap_or(u32::MAX);

            let batch = self
                .client
                .call(cost, || self.fetch_batch(api_key, symbols))
                .await?;
            Ok(Payload::Quotes(batch))
        })
    }

    fn circuit_breaker_status(&self) -> CircuitStatus {
        self.client.circuit_breaker_status()
    }
}

#[derive(Debug, Deserialize)]
struct RawQuote {
    c: f64,
    d: Option<f64>,
    dp: Option<f64>,
    h: f64,
    l: f64,
    o: f64,
    pc: f64,
    #[serde(default)]
    t: i64,
}

fn normalize_quote(symbol: Symbol, raw: RawQuote) -> Result<Quote, ClientError> {
    const PROVIDER: ProviderId = ProviderId::Quotes;

    // Finnhub answers unknown symbols with an all-zero quote.
    if raw.t == 0 && raw.c == 0.0 {
        return Err(upstream_rejection(PROVIDER, format!("unknown symbol '{symbol}'")));
    }

    let as_of = UtcDateTime::from_unix_timestamp(raw.t).map_err(|e| invalid_payload(PROVIDER, e))?;
    Quote::new(symbol, raw.c, raw.d, raw.dp, raw.h, raw.l, raw.o, raw.pc, as_of)
        .map_err(|e| invalid_payload(PROVIDER, e))
}
