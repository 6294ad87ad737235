use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;

use crate::circuit_breaker::CircuitStatus;
use crate::client::ProviderClient;
use crate::data_source::{
    check_limit, ClientError, FetchError, LiveOptions, MarketDataSource, Payload,
    MAX_ECONOMIC_LIMIT,
};
use crate::http_client::HttpRequest;
use crate::{validate_calendar_date, EconomicObservation, EconomicSeries, ProviderId, ValidationError};

use super::{invalid_payload, parse_decimal, rejected, upstream_rejection};

pub(super) const DEFAULT_BASE_URL: &str = "https://api.stlouisfed.org";

/// FRED marks observations without a value with a lone dot.
const MISSING_VALUE: &str = ".";

/// Economic slot backed by FRED `series/observations`, newest first.
#[derive(Debug)]
pub struct FredAdapter {
    client: ProviderClient,
}

impl FredAdapter {
    pub fn new(client: ProviderClient) -> Self {
        Self { client }
    }

    async fn fetch_series(&self, api_key: &str, series_id: String, limit: usize) -> Result<EconomicSeries, ClientError> {
        let limit = limit.to_string();
        let request = HttpRequest::get(self.client.endpoint("fred/series/observations")).with_query([
            ("series_id", series_id.as_str()),
            ("api_key", api_key),
            ("file_type", "json"),
            ("sort_order", "desc"),
            ("limit", limit.as_str()),
        ]);

        let response: ObservationsResponse = self.client.get_json(request).await?;
        normalize_series(series_id, response)
    }
}

impl MarketDataSource for FredAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Economic
    }

    fn fetch<'a>(
        &'a self,
        options: &'a LiveOptions,
    ) -> Pin<Box<dyn Future<Output = Result<Payload, FetchError>> + Send + 'a>> {
        Box::pin(async move {
            let series_id = options.economic_series_id.trim().to_ascii_uppercase();
            if series_id.is_empty() {
                return Err(rejected(ValidationError::EmptyField {
                    field: "economic_series_id",
                }));
            }
            let limit = check_limit("economic_limit", options.economic_limit, MAX_ECONOMIC_LIMIT)
                .map_err(rejected)?;
            let api_key = self.client.require_api_key().map_err(rejected)?;

            let series = self
                .client
                .call(1, || self.fetch_series(api_key, series_id, limit))
                .await?;
            Ok(Payload::Economic(series))
        })
    }

    fn circuit_breaker_status(&self) -> CircuitStatus {
        self.client.circuit_breaker_status()
    }
}

#[derive(Debug, Deserialize)]
struct ObservationsResponse {
    error_message: Option<String>,
    #[serde(default)]
    observations: Vec<RawObservation>,
}

#[derive(Debug, Deserialize)]
struct RawObservation {
    date: String,
    value: String,
}

fn normalize_series(series_id: String, response: ObservationsResponse) -> Result<EconomicSeries, ClientError> {
    const PROVIDER: ProviderId = ProviderId::Economic;

    if let Some(message) = response.error_message {
        return Err(upstream_rejection(PROVIDER, message));
    }

    let observations = response
        .observations
        .into_iter()
        .filter(|raw| raw.value.trim() != MISSING_VALUE)
        .map(|raw| {
            let date = validate_calendar_date(&raw.date).map_err(|e| invalid_payload(PROVIDER, e))?;
            let value = parse_decimal(PROVIDER, "value", &raw.value)?;
            Ok(EconomicObservation { date, value })
        })
        .collect::<Result<Vec<_>, ClientError>>()?;

    Ok(EconomicSeries {
        series_id,
        observations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testing::{client, RecordingHttpClient};
    use crate::data_source::ClientErrorKind;
    use crate::http_client::{HttpError, HttpResponse};

    const OBSERVATIONS: &str = r#"{
        "realtime_start": "2024-01-05",
        "count": 3,
        "observations": [
            {"realtime_start": "2024-01-05", "date": "2023-10-01", "value": "27610.128"},
            {"realtime_start": "2024-01-05", "date": "2023-07-01", "value": "."},
            {"realtime_start": "2024-01-05", "date": "2023-04-01", "value": "26813.601"}
        ]
    }"#;

    #[tokio::test]
    async fn missing_values_are_skipped_newest_first() {
        let http = RecordingHttpClient::json(OBSERVATIONS);
        let adapter = FredAdapter::new(client(ProviderId::Economic, http.clone(), Some("fred-key")));

        let Payload::Economic(series) = adapter.fetch(&LiveOptions::default()).await.expect("series") else {
            panic!("expected economic payload");
        };

        assert_eq!(series.series_id, "GDP");
        assert_eq!(series.observations.len(), 2);
        assert_eq!(series.latest().map(|o| o.date.as_str()), Some("2023-10-01"));

        let url = &http.requests()[0].url;
        assert!(url.starts_with("https://example.test/fred/series/observations?series_id=GDP"));
        assert!(url.contains("api_key=fred-key"));
        assert!(url.contains("sort_order=desc"));
        assert!(url.contains("limit=12"));
    }

    #[tokio::test]
    async fn bad_request_status_is_upstream_4xx() {
        let http = RecordingHttpClient::respond(Ok(HttpResponse::new(
            400,
            r#"{"error_code":400,"error_message":"Bad Request. The series does not exist."}"#,
        )));
        let adapter = FredAdapter::new(client(ProviderId::Economic, http, Some("fred-key")));

        let error = adapter.fetch(&LiveOptions::default()).await.expect_err("unknown series");
        assert_eq!(error.inner().and_then(ClientError::status), Some(400));
    }

    #[tokio::test]
    async fn network_failure_maps_to_network_kind() {
        let http = RecordingHttpClient::respond(Err(HttpError::connect("connection refused")));
        let adapter = FredAdapter::new(client(ProviderId::Economic, http, Some("fred-key")));

        let error = adapter.fetch(&LiveOptions::default()).await.expect_err("refused");
        assert_eq!(
            error.inner().map(ClientError::kind),
            Some(ClientErrorKind::Network)
        );
        assert_eq!(adapter.circuit_breaker_status().failure_count, 1);
    }
}
