//! Shared plumbing for provider adapters.
//!
//! A [`ProviderClient`] owns everything one upstream needs to be called safely:
//! the transport, a circuit breaker, the retry policy, a per-request timeout
//! and an optional local rate budget. Adapters only build requests and decode
//! bodies.
//!
//! Call order for one logical fetch:
//!
//! 1. rate budget (`RateLimited`, breaker untouched)
//! 2. circuit breaker (`CircuitOpenError`, operation never constructed)
//! 3. operation: each HTTP request is retried on transient failures, the
//!    breaker records only the operation's final outcome

use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::circuit_breaker::{
    BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitStatus, TransitionObserver,
};
use crate::data_source::{ClientError, FetchError};
use crate::http_client::{HttpClient, HttpRequest};
use crate::retry::RetryConfig;
use crate::throttling::RateBudget;
use crate::ProviderId;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport, breaker and policies for one provider.
pub struct ProviderClient {
    provider: ProviderId,
    base_url: String,
    api_key: Option<String>,
    http: Arc<dyn HttpClient>,
    breaker: CircuitBreaker,
    retry: RetryConfig,
    request_timeout: Duration,
    rate_budget: Option<RateBudget>,
}

impl Debug for ProviderClient {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderClient")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("breaker", &self.breaker)
            .field("retry", &self.retry)
            .field("request_timeout", &self.request_timeout)
            .field("rate_budget", &self.rate_budget)
            .finish()
    }
}

impl ProviderClient {
    pub fn new(provider: ProviderId, base_url: impl Into<String>, http: Arc<dyn HttpClient>) -> Self {
        Self {
            provider,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_key: None,
            http,
            breaker: CircuitBreaker::new(provider.service_name(), CircuitBreakerConfig::default()),
            retry: RetryConfig::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            rate_budget: None,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|key| !key.trim().is_empty());
        self
    }

    pub fn with_circuit_breaker(
        mut self,
        config: CircuitBreakerConfig,
        observer: Option<TransitionObserver>,
    ) -> Self {
        let breaker = CircuitBreaker::new(self.provider.service_name(), config);
        self.breaker = match observer {
            Some(observer) => breaker.with_observer(observer),
            None => breaker,
        };
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn with_rate_budget(mut self, rate_budget: Option<RateBudget>) -> Self {
        self.rate_budget = rate_budget;
        self
    }

    pub const fn provider(&self) -> ProviderId {
        self.provider
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    /// The credential, or a local `InvalidRequest` when none is configured.
    pub fn require_api_key(&self) -> Result<&str, ClientError> {
        self.api_key().ok_or_else(|| {
            ClientError::invalid_request(format!(
                "no API key configured for {} (set {})",
                self.provider,
                self.provider.api_key_env()
            ))
        })
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn circuit_breaker_status(&self) -> CircuitStatus {
        self.breaker.status()
    }

    /// Runs one logical fetch through the rate budget and the circuit breaker.
    ///
    /// `cost` is the number of upstream requests the operation will issue.
    pub async fn call<T, F, Fut>(&self, cost: u32, operation: F) -> Result<T, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        if let Some(budget) = &self.rate_budget {
            budget.try_acquire_n(cost).map_err(|wait| {
                BreakerError::Inner(ClientError::rate_limited(format!(
                    "{} local request budget exhausted; retry in {:.1}s",
                    self.provider,
                    wait.as_secs_f64()
                )))
            })?;
        }

        self.breaker.execute(operation).await
    }

    /// Sends one request, retrying transient failures. Returns the body of a
    /// 2xx response.
    pub async fn send(&self, request: HttpRequest) -> Result<String, ClientError> {
        let request = request.with_timeout(self.request_timeout);
        let mut attempt = 0;
        loop {
            match self.send_once(request.clone()).await {
                Ok(body) => return Ok(body),
                Err(error) if self.retry.should_retry(&error, attempt) => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    debug!(
                        provider = %self.provider,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        code = error.code(),
                        "retrying provider request"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// [`send`](Self::send) followed by JSON decoding into `T`.
    pub async fn get_json<T: DeserializeOwned>(&self, request: HttpRequest) -> Result<T, ClientError> {
        let body = self.send(request).await?;
        decode_json(self.provider, &body)
    }

    async fn send_once(&self, request: HttpRequest) -> Result<String, ClientError> {
        let timeout = request.timeout;
        let response = tokio::time::timeout(timeout, self.http.execute(request))
            .await
            .map_err(|_| {
                ClientError::timeout(format!(
                    "{} did not respond within {}ms",
                    self.provider,
                    timeout.as_millis()
                ))
            })??;

        if !response.is_success() {
            return Err(ClientError::upstream(
                response.status,
                format!("{} returned HTTP {}", self.provider, response.status),
            ));
        }
        Ok(response.body)
    }
}

pub(crate) fn decode_json<T: DeserializeOwned>(provider: ProviderId, body: &str) -> Result<T, ClientError> {
    serde_json::from_str(body).map_err(|e| {
        ClientError::malformed(format!("{provider} response has an unexpected shape: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use crate::circuit_breaker::CircuitState;
    use crate::data_source::ClientErrorKind;
    use crate::http_client::{HttpError, HttpResponse};

    #[derive(Default)]
    struct ScriptedHttpClient {
        responses: Mutex<VecDeque<Result<HttpResponse, HttpError>>>,
        calls: AtomicU32,
    }

    impl ScriptedHttpClient {
        fn new(responses: Vec<Result<HttpResponse, HttpError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl HttpClient for ScriptedHttpClient {
        fn execute<'a>(
            &'a self,
            _request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self
                .responses
                .lock()
                .expect("script lock")
                .pop_front()
                .unwrap_or_else(|| Ok(HttpResponse::ok_json("{}")));
            Box::pin(async move { next })
        }
    }

    struct StalledHttpClient;

    impl HttpClient for StalledHttpClient {
        fn execute<'a>(
            &'a self,
            _request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
            Box::pin(std::future::pending())
        }
    }

    fn client(http: Arc<dyn HttpClient>) -> ProviderClient {
        ProviderClient::new(ProviderId::Quotes, "https://example.test/api/", http)
            .with_retry(RetryConfig::fixed(Duration::from_millis(1), 2))
    }

    async fn fetch_body(client: &ProviderClient) -> Result<String, FetchError> {
        client
            .call(1, || client.send(HttpRequest::get(client.endpoint("quote"))))
            .await
    }

    #[tokio::test]
    async fn transient_failures_are_retried_inside_one_breaker_call() {
        let http = Arc::new(ScriptedHttpClient::new(vec![
            Ok(HttpResponse::new(503, "busy")),
            Err(HttpError::connect("reset")),
            Ok(HttpResponse::ok_json(r#"{"c":1}"#)),
        ]));
        let client = client(http.clone());

        assert_eq!(fetch_body(&client).await, Ok(String::from(r#"{"c":1}"#)));
        assert_eq!(http.calls(), 3);
        assert_eq!(client.circuit_breaker_status().failure_count, 0);
    }

    #[tokio::test]
    async fn exhausted_retries_count_as_one_breaker_failure() {
        let http = Arc::new(ScriptedHttpClient::new(vec![
            Ok(HttpResponse::new(500, "")),
            Ok(HttpResponse::new(500, "")),
            Ok(HttpResponse::new(500, "")),
        ]));
        let client = client(http.clone());

        let error = fetch_body(&client).await.expect_err("all attempts fail");
        assert_eq!(
            error.inner().map(ClientError::kind),
            Some(ClientErrorKind::Upstream5xx)
        );
        assert_eq!(http.calls(), 3);
        assert_eq!(client.circuit_breaker_status().failure_count, 1);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let http = Arc::new(ScriptedHttpClient::new(vec![Ok(HttpResponse::new(401, ""))]));
        let client = client(http.clone());

        let error = fetch_body(&client).await.expect_err("unauthorized");
        assert_eq!(error.inner().and_then(ClientError::status), Some(401));
        assert_eq!(http.calls(), 1);
    }

    #[tokio::test]
    async fn request_timeout_maps_to_timeout_kind() {
        let client = ProviderClient::new(ProviderId::News, "https://example.test", Arc::new(StalledHttpClient))
            .with_retry(RetryConfig::no_retry())
            .with_request_timeout(Duration::from_millis(20));

        let error = fetch_body(&client).await.expect_err("stalled upstream");
        assert_eq!(error.inner().map(ClientError::kind), Some(ClientErrorKind::Timeout));
    }

    #[tokio::test]
    async fn exhausted_budget_rejects_without_touching_breaker() {
        let http = Arc::new(ScriptedHttpClient::new(Vec::new()));
        let client = client(http.clone())
            .with_rate_budget(Some(RateBudget::new(1, Duration::from_secs(60))))
            .with_circuit_breaker(
                CircuitBreakerConfig {
                    failure_threshold: 1,
                    open_timeout: Duration::from_secs(60),
                },
                None,
            );

        assert!(fetch_body(&client).await.is_ok());
        let error = fetch_body(&client).await.expect_err("budget spent");
        assert_eq!(
            error.inner().map(ClientError::kind),
            Some(ClientErrorKind::RateLimited)
        );
        assert_eq!(http.calls(), 1);
        assert_eq!(client.circuit_breaker_status().state, CircuitState::Closed);
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let client = client(Arc::new(ScriptedHttpClient::default()));
        assert_eq!(client.endpoint("/quote"), "https://example.test/api/quote");
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let client = client(Arc::new(ScriptedHttpClient::default())).with_api_key(Some(String::from("  ")));
        let error = client.require_api_key().expect_err("blank key");
        assert_eq!(error.kind(), ClientErrorKind::InvalidRequest);
        assert!(error.message().contains("MARKETLENS_QUOTES_API_KEY"));
    }
}
