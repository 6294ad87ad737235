//! Per-provider circuit breaker.
//!
//! ```text
//! Closed ──[threshold consecutive failures]──> Open
//!    ^                                           │
//!    │                                  [open_timeout elapsed]
//!    │                                           v
//!    └────────[probe succeeds]──── HalfOpen ──[probe fails]──> Open
//! ```
//!
//! [`CircuitBreaker::execute`] is the only way to run a guarded call. While the
//! circuit is open, calls are rejected with [`CircuitOpenError`] before the
//! operation is even constructed, so a degraded provider sees no traffic until
//! the cool-down elapses. After that exactly one probe is admitted; everything
//! else keeps failing fast until the probe settles.

use std::fmt::{Debug, Display, Formatter};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::UtcDateTime;

/// Runtime circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl Display for CircuitState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circuit breaker thresholds and timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            open_timeout: Duration::from_secs(30),
        }
    }
}

/// Notification emitted on every state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub service: String,
    pub previous: CircuitState,
    pub current: CircuitState,
    pub at: UtcDateTime,
}

/// Observer invoked synchronously for each [`StateTransition`].
pub type TransitionObserver = Arc<dyn Fn(&StateTransition) + Send + Sync>;

/// Read-only breaker snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitStatus {
    pub service: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_state_change: UtcDateTime,
}

/// The breaker refused the call; the operation was never attempted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit for '{service}' is open; next probe in {}ms", retry_in.as_millis())]
pub struct CircuitOpenError {
    pub service: String,
    /// Remaining cool-down. Zero while another probe is in flight.
    pub retry_in: Duration,
}

/// Outcome of a guarded call that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakerError<E> {
    /// Blocked by policy.
    Open(CircuitOpenError),
    /// The operation ran and failed.
    Inner(E),
}

impl<E> BreakerError<E> {
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open(_))
    }

    pub fn inner(&self) -> Option<&E> {
        match self {
            Self::Open(_) => None,
            Self::Inner(error) => Some(error),
        }
    }
}

impl<E> From<CircuitOpenError> for BreakerError<E> {
    fn from(error: CircuitOpenError) -> Self {
        Self::Open(error)
    }
}

impl<E: Display> Display for BreakerError<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open(error) => Display::fmt(error, f),
            Self::Inner(error) => Display::fmt(error, f),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for BreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open(error) => Some(error),
            Self::Inner(error) => Some(error),
        }
    }
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    consecutive_failures: u32,
    changed_at: Instant,
    changed_at_utc: UtcDateTime,
    probe_in_flight: bool,
}

impl CircuitInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            changed_at: Instant::now(),
            changed_at_utc: UtcDateTime::now(),
            probe_in_flight: false,
        }
    }

    fn transition(&mut self, service: &str, next: CircuitState) -> StateTransition {
        let previous = self.state;
        self.state = next;
        self.changed_at = Instant::now();
        self.changed_at_utc = UtcDateTime::now();
        if next == CircuitState::Closed {
            self.consecutive_failures = 0;
        }

        StateTransition {
            service: service.to_owned(),
            previous,
            current: next,
            at: self.changed_at_utc,
        }
    }
}

/// Thread-safe circuit breaker guarding one upstream dependency.
pub struct CircuitBreaker {
    service: String,
    config: CircuitBreakerConfig,
    inner: Mutex<CircuitInner>,
    observer: Option<TransitionObserver>,
}

impl Debug for CircuitBreaker {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("service", &self.service)
            .field("config", &self.config)
            .field("inner", &self.inner)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            service: service.into(),
            config,
            inner: Mutex::new(CircuitInner::new()),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: TransitionObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub const fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    /// Runs `operation` if the circuit admits it.
    ///
    /// The open-circuit rejection happens before `operation` is called and
    /// without suspending. A probe future dropped before completion frees the
    /// probe slot without counting as success or failure.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut permit = self.acquire()?;
        let outcome = operation().await;
        match &outcome {
            Ok(_) => permit.settle(true),
            Err(_) => permit.settle(false),
        }
        outcome.map_err(BreakerError::Inner)
    }

    /// Snapshot without side effects; an elapsed cool-down is reported as `Open`.
    pub fn status(&self) -> CircuitStatus {
        let inner = self.lock();
        CircuitStatus {
            service: self.service.clone(),
            state: inner.state,
            failure_count: inner.consecutive_failures,
            last_state_change: inner.changed_at_utc,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    fn lock(&self) -> MutexGuard<'_, CircuitInner> {
        // Critical sections never panic mid-update, so a poisoned lock still
        // holds a consistent state.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn acquire(&self) -> Result<CallPermit<'_>, CircuitOpenError> {
        let mut transition = None;
        let admitted = {
            let mut inner = self.lock();
            match inner.state {
                CircuitState::Closed => Ok(false),
                CircuitState::HalfOpen if inner.probe_in_flight => Err(Duration::ZERO),
                CircuitState::HalfOpen => {
                    inner.probe_in_flight = true;
                    Ok(true)
                }
                CircuitState::Open => {
                    let elapsed = inner.changed_at.elapsed();
                    if elapsed >= self.config.open_timeout {
                        transition = Some(inner.transition(&self.service, CircuitState::HalfOpen));
                        inner.probe_in_flight = true;
                        Ok(true)
                    } else {
                        Err(self.config.open_timeout - elapsed)
                    }
                }
            }
        };

        if let Some(transition) = transition {
            self.notify(&transition);
        }

        match admitted {
            Ok(probe) => Ok(CallPermit {
                breaker: self,
                probe,
                settled: false,
            }),
            Err(retry_in) => Err(CircuitOpenError {
                service: self.service.clone(),
                retry_in,
            }),
        }
    }

    fn record(&self, probe: bool, success: bool) {
        let transition = {
            let mut inner = self.lock();
            if probe {
                inner.probe_in_flight = false;
            }

            match (inner.state, probe, success) {
                (CircuitState::HalfOpen, true, true) => {
                    Some(inner.transition(&self.service, CircuitState::Closed))
                }
                (CircuitState::HalfOpen, true, false) => {
                    inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                    Some(inner.transition(&self.service, CircuitState::Open))
                }
                (CircuitState::Closed, _, true) => {
                    inner.consecutive_failures = 0;
                    None
                }
                (CircuitState::Closed, _, false) => {
                    inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                    if inner.consecutive_failures >= self.config.failure_threshold {
                        Some(inner.transition(&self.service, CircuitState::Open))
                    } else {
                        None
                    }
                }
                // Calls admitted before the circuit tripped settle late; the
                // state machine has already moved on without them.
                _ => None,
            }
        };

        if let Some(transition) = transition {
            self.notify(&transition);
        }
    }

    fn release_probe(&self) {
        self.lock().probe_in_flight = false;
    }

    fn notify(&self, transition: &StateTransition) {
        match transition.current {
            CircuitState::Open => warn!(
                service = %transition.service,
                previous = %transition.previous,
                open_timeout_ms = self.config.open_timeout.as_millis() as u64,
                "circuit opened"
            ),
            CircuitState::HalfOpen => info!(service = %transition.service, "circuit half-open, probing"),
            CircuitState::Closed => info!(service = %transition.service, "circuit closed"),
        }

        if let Some(observer) = &self.observer {
            observer(transition);
        }
    }
}

/// Admission ticket for one guarded call.
struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl CallPermit<'_> {
    fn settle(&mut self, success: bool) {
        self.settled = true;
        self.breaker.record(self.probe, success);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if self.probe && !self.settled {
            self.breaker.release_probe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(threshold: u32, open_timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test-provider",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                open_timeout,
            },
        )
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        breaker.execute(|| async { Err::<(), _>("boom") }).await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<u32, BreakerError<&'static str>> {
        breaker.execute(|| async { Ok::<_, &'static str>(7) }).await
    }

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let breaker = breaker(2, Duration::from_secs(60));

        assert_eq!(fail(&breaker).await, Err(BreakerError::Inner("boom")));
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(fail(&breaker).await, Err(BreakerError::Inner("boom")));
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.consecutive_failures(), 2);
    }

    #[tokio::test]
    async fn open_circuit_rejects_without_invoking_operation() {
        let breaker = breaker(1, Duration::from_secs(60));
        let _ = fail(&breaker).await;

        let calls = AtomicU32::new(0);
        let result = breaker
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, &'static str>(()) }
            })
            .await;

        let error = result.expect_err("open circuit must reject");
        assert!(error.is_open());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        match error {
            BreakerError::Open(open) => {
                assert_eq!(open.service, "test-provider");
                assert!(open.retry_in > Duration::from_secs(59));
            }
            BreakerError::Inner(_) => unreachable!("checked is_open above"),
        }
    }

    #[tokio::test]
    async fn success_resets_counter_below_threshold() {
        let breaker = breaker(3, Duration::from_secs(60));
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.consecutive_failures(), 2);

        assert_eq!(succeed(&breaker).await, Ok(7));
        assert_eq!(breaker.consecutive_failures(), 0);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn probe_success_closes_circuit() {
        let breaker = breaker(1, Duration::from_millis(10));
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(succeed(&breaker).await, Ok(7));
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn probe_failure_reopens_and_restarts_window() {
        let breaker = breaker(3, Duration::from_millis(30));
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        let first_open = breaker.status().last_state_change;

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(fail(&breaker).await, Err(BreakerError::Inner("boom")));
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.status().last_state_change > first_open);

        let rejected = succeed(&breaker).await.expect_err("window restarted");
        assert!(rejected.is_open());
    }

    #[tokio::test]
    async fn admits_single_probe_while_half_open() {
        let breaker = Arc::new(breaker(1, Duration::from_millis(10)));
        let _ = fail(&breaker).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let probe_breaker = Arc::clone(&breaker);
        let probe = tokio::spawn(async move {
            probe_breaker
                .execute(|| async move {
                    let _ = started_tx.send(());
                    let _ = release_rx.await;
                    Ok::<_, &'static str>(1)
                })
                .await
        });

        started_rx.await.expect("probe started");
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        let concurrent = succeed(&breaker).await.expect_err("second probe rejected");
        assert!(concurrent.is_open());

        release_tx.send(()).expect("probe still waiting");
        assert_eq!(probe.await.expect("probe task"), Ok(1));
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn dropped_probe_frees_the_slot() {
        let breaker = breaker(1, Duration::from_millis(10));
        let _ = fail(&breaker).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let stalled = breaker.execute(|| std::future::pending::<Result<(), &'static str>>());
        let timed_out = tokio::time::timeout(Duration::from_millis(10), stalled).await;
        assert!(timed_out.is_err());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        assert_eq!(succeed(&breaker).await, Ok(7));
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn observer_sees_every_transition() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let breaker = breaker(1, Duration::from_millis(10)).with_observer(Arc::new(
            move |transition: &StateTransition| {
                sink.lock()
                    .expect("observer sink")
                    .push((transition.previous, transition.current));
            },
        ));

        let _ = fail(&breaker).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = succeed(&breaker).await;

        let seen = seen.lock().expect("observer sink").clone();
        assert_eq!(
            seen,
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
    }

    #[test]
    fn status_reports_service_and_counter() {
        let breaker = breaker(5, Duration::from_secs(1));
        let status = breaker.status();
        assert_eq!(status.service, "test-provider");
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.failure_count, 0);
    }
}
