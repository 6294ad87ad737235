use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use crate::circuit_breaker::CircuitStatus;
use crate::client::ProviderClient;
use crate::data_source::{ClientError, FetchError, LiveOptions, MarketDataSource, Payload};
use crate::http_client::{HttpAuth, HttpRequest};
use crate::{validate_currency_code, CryptoPrice, CryptoPrices, ProviderId, UtcDateTime, ValidationError};

use super::{invalid_payload, rejected, upstream_rejection};

pub(super) const DEFAULT_BASE_URL: &str = "https://api.coingecko.com/api/v3";

const DEMO_KEY_HEADER: &str = "x-cg-demo-api-key";

/// Crypto slot backed by CoinGecko `simple/price`.
///
/// The public API works without a key; a demo key raises the rate limit.
#[derive(Debug)]
pub struct CoinGeckoAdapter {
    client: ProviderClient,
}

impl CoinGeckoAdapter {
    pub fn new(client: ProviderClient) -> Self {
        Self { client }
    }

    async fn fetch_prices(&self, ids: Vec<String>, vs_currency: String) -> Result<CryptoPrices, ClientError> {
        let vs = vs_currency.to_ascii_lowercase();
        let joined = ids.join(",");
        let mut request = HttpRequest::get(self.client.endpoint("simple/price")).with_query([
            ("ids", joined.as_str()),
            ("vs_currencies", vs.as_str()),
            ("include_market_cap", "true"),
            ("include_24hr_change", "true"),
            ("include_last_updated_at", "true"),
        ]);
        if let Some(key) = self.client.api_key() {
            request = request.with_auth(&HttpAuth::header(DEMO_KEY_HEADER, key));
        }

        let body: HashMap<String, HashMap<String, Option<f64>>> = self.client.get_json(request).await?;
        normalize_prices(&ids, vs_currency, &body)
    }
}

impl MarketDataSource for CoinGeckoAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Crypto
    }

    fn fetch<'a>(
        &'a self,
        options: &'a LiveOptions,
    ) -> Pin<Box<dyn Future<Output = Result<Payload, FetchError>> + Send + 'a>> {
        Box::pin(async move {
            let ids = normalize_ids(&options.crypto_ids).map_err(rejected)?;
            let vs_currency = validate_currency_code(&options.vs_currency).map_err(rejected)?;

            let prices = self
                .client
                .call(1, || self.fetch_prices(ids, vs_currency))
                .await?;
            Ok(Payload::Crypto(prices))
        })
    }

    fn circuit_breaker_status(&self) -> CircuitStatus {
        self.client.circuit_breaker_status()
    }
}

/// Trims, lowercases and de-duplicates asset ids, keeping request order.
fn normalize_ids(raw: &[String]) -> Result<Vec<String>, ValidationError> {
    let mut ids: Vec<String> = Vec::with_capacity(raw.len());
    for id in raw {
        let id = id.trim().to_ascii_lowercase();
        if !id.is_empty() && !ids.contains(&id) {
            ids.push(id);
        }
    }
    if ids.is_empty() {
        return Err(ValidationError::EmptyField { field: "crypto_ids" });
    }
    Ok(ids)
}

fn normalize_prices(
    ids: &[String],
    vs_currency: String,
    body: &HashMap<String, HashMap<String, Option<f64>>>,
) -> Result<CryptoPrices, ClientError> {
    const PROVIDER: ProviderId = ProviderId::Crypto;
    let vs = vs_currency.to_ascii_lowercase();
    let market_cap_key = format!("{vs}_market_cap");
    let change_key = format!("{vs}_24h_change");

    let mut prices = Vec::with_capacity(ids.len());
    // Unknown ids are simply absent from the response.
    for id in ids {
        let Some(fields) = body.get(id) else {
            continue;
        };
        let Some(price) = fields.get(&vs).copied().flatten() else {
            continue;
        };
        let last_updated = fields
            .get("last_updated_at")
            .copied()
            .flatten()
            .and_then(|seconds| UtcDateTime::from_unix_timestamp(seconds as i64).ok());

        let price = CryptoPrice::new(
            id.clone(),
            price,
            fields.get(&market_cap_key).copied().flatten(),
            fields.get(&change_key).copied().flatten(),
            last_updated,
        )
        .map_err(|e| invalid_payload(PROVIDER, e))?;
        prices.push(price);
    }

    if prices.is_empty() {
        return Err(upstream_rejection(
            PROVIDER,
            format!("no {vs} prices for ids [{}]", ids.join(", ")),
        ));
    }

    Ok(CryptoPrices {
        vs_currency,
        prices,
    })
}
