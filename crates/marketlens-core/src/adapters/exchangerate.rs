use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;

use crate::circuit_breaker::CircuitStatus;
use crate::client::ProviderClient;
use crate::data_source::{ClientError, FetchError, LiveOptions, MarketDataSource, Payload};
use crate::http_client::HttpRequest;
use crate::{validate_currency_code, ForexRates, ProviderId, UtcDateTime, ValidationError};

use super::{invalid_payload, rejected, upstream_rejection};

pub(super) const DEFAULT_BASE_URL: &str = "https://v6.exchangerate-api.com";

/// Forex slot backed by ExchangeRate-API.
///
/// The key is a URL path segment, so request URLs must never be logged.
#[derive(Debug)]
pub struct ExchangeRateAdapter {
    client: ProviderClient,
}

impl ExchangeRateAdapter {
    pub fn new(client: ProviderClient) -> Self {
        Self { client }
    }

    async fn fetch_rates(
        &self,
        api_key: &str,
        base: String,
        symbols: Vec<String>,
    ) -> Result<ForexRates, ClientError> {
        let path = format!(
            "v6/{}/latest/{}",
            urlencoding::encode(api_key),
            base
        );
        let response: LatestResponse = self
            .client
            .get_json(HttpRequest::get(self.client.endpoint(&path)))
            .await?;
        normalize_rates(&base, &symbols, response)
    }
}

impl MarketDataSource for ExchangeRateAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Forex
    }

    fn fetch<'a>(
        &'a self,
        options: &'a LiveOptions,
    ) -> Pin<Box<dyn Future<Output = Result<Payload, FetchError>> + Send + 'a>> {
        Box::pin(async move {
            let base = validate_currency_code(&options.forex_base).map_err(rejected)?;
            let symbols = options
                .forex_symbols
                .iter()
                .map(|code| validate_currency_code(code))
                .collect::<Result<Vec<_>, ValidationError>>()
                .map_err(rejected)?;
            let api_key = self.client.require_api_key().map_err(rejected)?;

            let rates = self
                .client
                .call(1, || self.fetch_rates(api_key, base, symbols))
                .await?;
            Ok(Payload::Forex(rates))
        })
    }

    fn circuit_breaker_status(&self) -> CircuitStatus {
        self.client.circuit_breaker_status()
    }
}

#[derive(Debug, Deserialize)]
struct LatestResponse {
    result: String,
    #[serde(rename = "error-type")]
    error_type: Option<String>,
    base_code: Option<String>,
    time_last_update_unix: Option<i64>,
    #[serde(default)]
    conversion_rates: BTreeMap<String, f64>,
}

/// Error types that blame the caller rather than the service.
const REQUEST_ERRORS: [&str; 5] = [
    "unsupported-code",
    "malformed-request",
    "invalid-key",
    "inactive-account",
    "quota-reached",
];

fn normalize_rates(
    base: &str,
    symbols: &[String],
    response: LatestResponse,
) -> Result<ForexRates, ClientError> {
    const PROVIDER: ProviderId = ProviderId::Forex;

    if response.result != "success" {
        let error_type = response.error_type.unwrap_or_else(|| String::from("unknown-error"));
        return Err(if REQUEST_ERRORS.contains(&error_type.as_str()) {
            upstream_rejection(PROVIDER, error_type)
        } else {
            ClientError::malformed(format!("{PROVIDER} reported '{error_type}'"))
        });
    }

    let rates: BTreeMap<String, f64> = if symbols.is_empty() {
        response.conversion_rates
    } else {
        symbols
            .iter()
            .filter_map(|code| {
                response
                    .conversion_rates
                    .get(code)
                    .map(|rate| (code.clone(), *rate))
            })
            .collect()
    };
    if rates.is_empty() {
        return Err(upstream_rejection(
            PROVIDER,
            format!("no rates for [{}]", symbols.join(", ")),
        ));
    }

    let as_of = response
        .time_last_update_unix
        .and_then(|seconds| UtcDateTime::from_unix_timestamp(seconds).ok())
        .unwrap_or_else(UtcDateTime::now);
    let base = response.base_code.as_deref().unwrap_or(base);

    ForexRates::new(base, rates, as_of).map_err(|e| invalid_payload(PROVIDER, e))
}
