//! Behavior tests for per-provider circuit breaking.
//!
//! These tests drive breakers directly and through real adapters backed by a
//! scripted HTTP double, checking which outcomes the breaker counts.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use marketlens_core::{
    adapters::adapter_for, BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitState,
    ClientError, ClientErrorKind, HttpResponse, LiveOptions, ProviderClient, ProviderId,
    RateBudget, RetryConfig, StateTransition,
};

use marketlens_tests::ScriptedHttp;

fn breaker(threshold: u32, open_timeout: Duration) -> CircuitBreaker {
    CircuitBreaker::new(
        "test-provider",
        CircuitBreakerConfig {
            failure_threshold: threshold,
            open_timeout,
        },
    )
}

async fn failing_call(breaker: &CircuitBreaker, calls: &AtomicUsize) -> Result<(), BreakerError<ClientError>> {
    breaker
        .execute(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(ClientError::upstream(500, "boom"))
        })
        .await
}

async fn succeeding_call(breaker: &CircuitBreaker, calls: &AtomicUsize) -> Result<u32, BreakerError<ClientError>> {
    breaker
        .execute(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ClientError>(7)
        })
        .await
}

// =============================================================================
// Breaker state machine
// =============================================================================

#[tokio::test]
async fn when_three_failures_then_cooldown_elapses_a_success_closes_the_circuit() {
    // Given: threshold 3 and a 1000 ms open timeout
    let breaker = breaker(3, Duration::from_millis(1_000));
    let calls = AtomicUsize::new(0);

    // When: three calls fail
    for _ in 0..3 {
        let error = failing_call(&breaker, &calls).await.expect_err("failure");
        assert!(!error.is_open(), "the original error is returned");
    }

    // Then: the circuit is open and an immediate call is rejected without running
    assert_eq!(breaker.state(), CircuitState::Open);
    let rejected = succeeding_call(&breaker, &calls).await.expect_err("open");
    assert!(rejected.is_open());
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // When: the open timeout elapses and the probe succeeds
    tokio::time::sleep(Duration::from_millis(1_050)).await;
    let value = succeeding_call(&breaker, &calls).await.expect("probe succeeds");

    // Then: the circuit is closed with a reset counter
    assert_eq!(value, 7);
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.consecutive_failures(), 0);
}

#[tokio::test]
async fn when_probe_fails_circuit_reopens_with_fresh_window() {
    // Given: an open circuit whose timeout has elapsed
    let breaker = breaker(1, Duration::from_millis(50));
    let calls = AtomicUsize::new(0);
    failing_call(&breaker, &calls).await.expect_err("opens");
    tokio::time::sleep(Duration::from_millis(60)).await;

    // When: the probe fails
    failing_call(&breaker, &calls).await.expect_err("probe fails");

    // Then: the circuit is open again and rejects immediately
    assert_eq!(breaker.state(), CircuitState::Open);
    let error = succeeding_call(&breaker, &calls).await.expect_err("still open");
    let BreakerError::Open(open) = error else {
        panic!("expected open circuit");
    };
    assert_eq!(open.service, "test-provider");
    assert!(open.retry_in <= Duration::from_millis(50));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn when_success_follows_failures_counter_resets() {
    // Given: two failures below a threshold of three
    let breaker = breaker(3, Duration::from_secs(60));
    let calls = AtomicUsize::new(0);
    failing_call(&breaker, &calls).await.expect_err("first");
    failing_call(&breaker, &calls).await.expect_err("second");
    assert_eq!(breaker.consecutive_failures(), 2);

    // When: one call succeeds
    succeeding_call(&breaker, &calls).await.expect("success");

    // Then: two more failures are needed before the circuit could open
    assert_eq!(breaker.consecutive_failures(), 0);
    failing_call(&breaker, &calls).await.expect_err("third");
    failing_call(&breaker, &calls).await.expect_err("fourth");
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test]
async fn status_does_not_apply_an_elapsed_timeout() {
    // Given: an open circuit whose timeout has already elapsed
    let breaker = breaker(1, Duration::from_millis(10));
    let calls = AtomicUsize::new(0);
    failing_call(&breaker, &calls).await.expect_err("opens");
    tokio::time::sleep(Duration::from_millis(20)).await;

    // When: status is read twice
    let first = breaker.status();
    let second = breaker.status();

    // Then: reading has no side effects
    assert_eq!(first.state, CircuitState::Open);
    assert_eq!(first, second);
}

// =============================================================================
// Breaker as seen through a provider adapter
// =============================================================================

fn news_client(http: Arc<ScriptedHttp>) -> ProviderClient {
    ProviderClient::new(ProviderId::News, "https://news.example", http)
        .with_api_key(Some(String::from("news-key")))
        .with_circuit_breaker(
            CircuitBreakerConfig {
                failure_threshold: 2,
                open_timeout: Duration::from_secs(60),
            },
            None,
        )
        .with_retry(RetryConfig::fixed(Duration::ZERO, 2))
}

#[tokio::test]
async fn when_retries_exhaust_breaker_counts_one_failure() {
    // Given: an upstream that always answers 503 and a client allowing 2 retries
    let http = ScriptedHttp::always(Ok(HttpResponse::new(503, "unavailable")));
    let adapter = adapter_for(news_client(http.clone()));

    // When: one logical fetch runs
    let error = adapter
        .fetch(&LiveOptions::default())
        .await
        .expect_err("upstream down");

    // Then: three attempts hit the wire but the breaker saw a single failure
    assert_eq!(http.request_count(), 3);
    assert_eq!(error.inner().map(ClientError::kind), Some(ClientErrorKind::Upstream5xx));
    assert_eq!(adapter.circuit_breaker_status().failure_count, 1);
}

#[tokio::test]
async fn when_retry_recovers_breaker_sees_success() {
    // Given: a transient 503 followed by a valid body
    let http = ScriptedHttp::new(vec![
        Ok(HttpResponse::new(503, "unavailable")),
        Ok(HttpResponse::ok_json(
            r#"{"status":"ok","totalResults":0,"articles":[]}"#,
        )),
    ]);
    let adapter = adapter_for(news_client(http.clone()));

    // When: the adapter fetches
    adapter.fetch(&LiveOptions::default()).await.expect("recovered");

    // Then: no failure is recorded
    assert_eq!(http.request_count(), 2);
    assert_eq!(adapter.circuit_breaker_status().failure_count, 0);
}

#[tokio::test]
async fn when_circuit_is_open_adapter_never_touches_the_network() {
    // Given: an adapter whose breaker opened after two failed fetches
    let http = ScriptedHttp::always(Ok(HttpResponse::new(500, "broken")));
    let adapter = adapter_for(news_client(http.clone()));
    for _ in 0..2 {
        adapter.fetch(&LiveOptions::default()).await.expect_err("fails");
    }
    let sent = http.request_count();

    // When: another fetch is attempted
    let error = adapter.fetch(&LiveOptions::default()).await.expect_err("open");

    // Then: it is rejected by the breaker with no request sent
    assert!(error.is_open());
    assert_eq!(http.request_count(), sent);
    assert_eq!(adapter.circuit_breaker_status().state, CircuitState::Open);
}

#[tokio::test]
async fn when_rate_budget_is_exhausted_breaker_is_untouched() {
    // Given: a budget of one request per minute and a healthy upstream
    let http = ScriptedHttp::always(Ok(HttpResponse::ok_json(
        r#"{"status":"ok","totalResults":0,"articles":[]}"#,
    )));
    let client = news_client(http.clone())
        .with_rate_budget(Some(RateBudget::new(1, Duration::from_secs(60))));
    let adapter = adapter_for(client);
    adapter.fetch(&LiveOptions::default()).await.expect("first fits");

    // When: a second fetch exceeds the budget
    let error = adapter.fetch(&LiveOptions::default()).await.expect_err("limited");

    // Then: it is rate limited locally and not counted as a failure
    assert_eq!(error.inner().map(ClientError::kind), Some(ClientErrorKind::RateLimited));
    assert_eq!(http.request_count(), 1);
    assert_eq!(adapter.circuit_breaker_status().failure_count, 0);
}

#[tokio::test]
async fn when_parameters_are_invalid_nothing_is_sent_or_counted() {
    // Given: options with an out-of-range news limit
    let http = ScriptedHttp::always(Ok(HttpResponse::new(500, "unused")));
    let adapter = adapter_for(news_client(http.clone()));
    let options = LiveOptions {
        news_limit: 0,
        ..LiveOptions::default()
    };

    // When: the adapter fetches
    let error = adapter.fetch(&options).await.expect_err("invalid");

    // Then: the request is rejected locally
    assert_eq!(error.inner().map(ClientError::kind), Some(ClientErrorKind::InvalidRequest));
    assert_eq!(http.request_count(), 0);
    assert_eq!(adapter.circuit_breaker_status().failure_count, 0);
}

#[tokio::test]
async fn observer_receives_transitions_from_adapter_breakers() {
    // Given: an adapter whose breaker reports to an observer
    let seen: Arc<Mutex<Vec<StateTransition>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let http = ScriptedHttp::always(Ok(HttpResponse::new(502, "bad gateway")));
    let client = ProviderClient::new(ProviderId::News, "https://news.example", http)
        .with_api_key(Some(String::from("news-key")))
        .with_retry(RetryConfig::no_retry())
        .with_circuit_breaker(
            CircuitBreakerConfig {
                failure_threshold: 1,
                open_timeout: Duration::from_secs(60),
            },
            Some(Arc::new(move |transition: &StateTransition| {
                sink.lock().expect("sink").push(transition.clone());
            })),
        );
    let adapter = adapter_for(client);

    // When: one fetch fails
    adapter.fetch(&LiveOptions::default()).await.expect_err("fails");

    // Then: the observer saw Closed -> Open for the news breaker
    let seen = seen.lock().expect("seen");
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].service, "news-provider");
    assert_eq!(seen[0].previous, CircuitState::Closed);
    assert_eq!(seen[0].current, CircuitState::Open);
}
