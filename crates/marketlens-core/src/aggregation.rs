//! Fan-out, merge and cache-write orchestration.
//!
//! ```text
//! get_live(options)
//!   ├─ single-flight: identical options already in flight? wait and share
//!   └─ refresh
//!        ├─ join_all(six fetches, each bounded by the aggregate deadline)
//!        ├─ merge into AggregateData, failures into the audit trail
//!        ├─ cache: aggregate key (unless every slot failed) + one fragment per slot
//!        └─ return the envelope
//!
//! get_cached()
//!   ├─ aggregate key hit  -> envelope verbatim
//!   ├─ fresh fragments    -> envelope rebuilt from fragments
//!   └─ nothing            -> None
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::cache::{Cache, CacheBackend};
use crate::circuit_breaker::CircuitStatus;
use crate::data_source::{ClientError, LiveOptions, MarketDataSource, Payload};
use crate::envelope::{AggregateData, AggregateResult, AggregateStatus, ProviderFailure};
use crate::{ProviderId, UtcDateTime, ValidationError};

pub const AGGREGATE_CACHE_KEY: &str = "aggregate:latest";

/// Per-category cache lifetimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    pub equities: Duration,
    pub crypto: Duration,
    pub forex: Duration,
    pub news: Duration,
    pub economic: Duration,
    pub quotes: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            equities: Duration::from_secs(60),
            crypto: Duration::from_secs(30),
            forex: Duration::from_secs(300),
            news: Duration::from_secs(600),
            economic: Duration::from_secs(1_800),
            quotes: Duration::from_secs(30),
        }
    }
}

impl CacheTtls {
    pub const fn for_provider(&self, provider: ProviderId) -> Duration {
        match provider {
            ProviderId::Equities => self.equities,
            ProviderId::Crypto => self.crypto,
            ProviderId::Forex => self.forex,
            ProviderId::News => self.news,
            ProviderId::Economic => self.economic,
            ProviderId::Quotes => self.quotes,
        }
    }

    /// The aggregate is only as fresh as its most volatile category.
    pub fn aggregate(&self) -> Duration {
        ProviderId::ALL
            .into_iter()
            .map(|provider| self.for_provider(provider))
            .min()
            .unwrap_or(self.quotes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationConfig {
    /// Upper bound for one whole `get_live` pass.
    pub deadline: Duration,
    pub single_flight: bool,
    pub audit_capacity: usize,
    pub ttls: CacheTtls,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(10),
            single_flight: true,
            audit_capacity: crate::audit::DEFAULT_AUDIT_CAPACITY,
            ttls: CacheTtls::default(),
        }
    }
}

/// Per-provider cache value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CachedFragment {
    fetched_at: UtcDateTime,
    payload: Payload,
}

struct Flight {
    id: u64,
    options: LiveOptions,
    done: watch::Receiver<Option<AggregateResult>>,
}

enum FlightRole {
    Leader(u64, watch::Sender<Option<AggregateResult>>),
    Follower(watch::Receiver<Option<AggregateResult>>),
    Independent,
}

/// Clears the in-flight slot when the leading pass finishes or is dropped.
struct FlightGuard<'a> {
    slot: &'a Mutex<Option<Flight>>,
    id: u64,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let mut slot = lock(self.slot);
        if slot.as_ref().is_some_and(|flight| flight.id == self.id) {
            *slot = None;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the six provider adapters and the shared cache.
pub struct AggregationService {
    sources: Vec<Arc<dyn MarketDataSource>>,
    cache: Arc<dyn Cache>,
    config: AggregationConfig,
    audit: AuditLog,
    flight: Mutex<Option<Flight>>,
    next_flight: AtomicU64,
}

impl std::fmt::Debug for AggregationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregationService")
            .field(
                "sources",
                &self.sources.iter().map(|source| source.id()).collect::<Vec<_>>(),
            )
            .field("cache", &self.cache.backend())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AggregationService {
    /// Requires exactly one source per provider category.
    pub fn new(
        sources: Vec<Arc<dyn MarketDataSource>>,
        cache: Arc<dyn Cache>,
        config: AggregationConfig,
    ) -> Result<Self, ValidationError> {
        let mut seen = BTreeSet::new();
        for source in &sources {
            let provider = source.id();
            if !seen.insert(provider) {
                return Err(ValidationError::DuplicateProvider {
                    provider: provider.as_str(),
                });
            }
        }
        if let Some(missing) = ProviderId::ALL.into_iter().find(|provider| !seen.contains(provider)) {
            return Err(ValidationError::MissingProvider {
                provider: missing.as_str(),
            });
        }

        let mut sources = sources;
        sources.sort_by_key(|source| source.id());
        Ok(Self {
            sources,
            cache,
            audit: AuditLog::new(config.audit_capacity),
            config,
            flight: Mutex::new(None),
            next_flight: AtomicU64::new(0),
        })
    }

    pub const fn config(&self) -> &AggregationConfig {
        &self.config
    }

    pub fn cache_backend(&self) -> CacheBackend {
        self.cache.backend()
    }

    /// Fetches all six categories concurrently. Never fails: provider failures
    /// become absent slots, cache failures are logged.
    pub async fn get_live(&self, options: &LiveOptions) -> AggregateResult {
        if !self.config.single_flight {
            return self.refresh(options).await;
        }

        match self.join_or_lead(options) {
            FlightRole::Leader(id, done) => {
                let _guard = FlightGuard {
                    slot: &self.flight,
                    id,
                };
                let result = self.refresh(options).await;
                done.send_replace(Some(result.clone()));
                result
            }
            FlightRole::Follower(mut done) => {
                let shared = done
                    .wait_for(Option::is_some)
                    .await
                    .ok()
                    .and_then(|result| (*result).clone());
                match shared {
                    Some(result) => {
                        debug!(request_id = %result.meta.request_id, "joined in-flight aggregation");
                        result
                    }
                    // The leading caller was cancelled before it finished.
                    None => self.refresh(options).await,
                }
            }
            FlightRole::Independent => self.refresh(options).await,
        }
    }

    /// The last aggregate, or one rebuilt from fresh per-provider fragments.
    /// `None` on a miss, never an error.
    pub async fn get_cached(&self) -> Option<AggregateResult> {
        if let Some(raw) = self.cache.get(AGGREGATE_CACHE_KEY).await {
            match serde_json::from_str::<AggregateResult>(&raw) {
                Ok(result) => return Some(result),
                Err(e) => warn!(key = AGGREGATE_CACHE_KEY, error = %e, "discarding undecodable cache entry"),
            }
        }
        self.rebuild_from_fragments().await
    }

    pub fn circuit_breaker_statuses(&self) -> BTreeMap<ProviderId, CircuitStatus> {
        self.sources
            .iter()
            .map(|source| (source.id(), source.circuit_breaker_status()))
            .collect()
    }

    /// Provider failures across recent passes, oldest first.
    pub fn recent_failures(&self) -> Vec<ProviderFailure> {
        self.audit.recent()
    }

    pub async fn clear_cache(&self) -> bool {
        self.cache.clear().await
    }

    fn join_or_lead(&self, options: &LiveOptions) -> FlightRole {
        let mut slot = lock(&self.flight);
        match slot.as_ref() {
            Some(flight) if flight.options == *options => FlightRole::Follower(flight.done.clone()),
            Some(_) => FlightRole::Independent,
            None => {
                let (done_tx, done_rx) = watch::channel(None);
                let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
                *slot = Some(Flight {
                    id,
                    options: options.clone(),
                    done: done_rx,
                });
                FlightRole::Leader(id, done_tx)
            }
        }
    }

    async fn refresh(&self, options: &LiveOptions) -> AggregateResult {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let deadline = self.config.deadline;

        let outcomes = join_all(self.sources.iter().map(|source| async move {
            let provider = source.id();
            (provider, tokio::time::timeout(deadline, source.fetch(options)).await)
        }))
        .await;

        let mut data = AggregateData::default();
        let mut failures = Vec::new();
        let mut fragments = Vec::new();
        let fetched_at = UtcDateTime::now();
        for (provider, outcome) in outcomes {
            let failure = match outcome {
                Ok(Ok(payload)) if payload.provider() == provider => {
                    fragments.push((provider, CachedFragment { fetched_at, payload: payload.clone() }));
                    data.insert(payload);
                    continue;
                }
                Ok(Ok(payload)) => ProviderFailure::from_fetch_error(
                    provider,
                    &ClientError::malformed(format!(
                        "{provider} source returned a {} payload",
                        payload.provider()
                    ))
                    .into(),
                ),
                Ok(Err(error)) => ProviderFailure::from_fetch_error(provider, &error),
                Err(_) => ProviderFailure::deadline_exceeded(provider, deadline),
            };
            warn!(
                request_id = %request_id,
                provider = %provider,
                code = failure.kind.code(),
                local = failure.local,
                error = %failure.message,
                "provider fetch failed"
            );
            failures.push(failure);
        }

        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let mut result = AggregateResult::new(request_id, latency_ms, data, failures.clone());
        self.audit.record(failures);

        if !self.write_cache(&result, fragments).await {
            result.meta.push_warning("aggregate was not written to the cache");
        }

        info!(
            request_id = %result.meta.request_id,
            status = %result.status,
            succeeded = result.meta.succeeded.len(),
            latency_ms = result.meta.latency_ms,
            "aggregation pass complete"
        );
        result
    }

    /// Returns false when the aggregate should have been cached but was not.
    async fn write_cache(&self, result: &AggregateResult, fragments: Vec<(ProviderId, CachedFragment)>) -> bool {
        let ttls = self.config.ttls;
        let fragment_writes = join_all(fragments.into_iter().filter_map(|(provider, fragment)| {
            let key = provider.cache_key();
            let value = serialize_for_cache(&key, &fragment)?;
            Some(async move { self.cache.set(&key, value, ttls.for_provider(provider)).await })
        }));

        // A pass where every provider failed must not evict the last good aggregate.
        if result.status == AggregateStatus::Error {
            fragment_writes.await;
            return true;
        }

        let aggregate_write = async {
            match serialize_for_cache(AGGREGATE_CACHE_KEY, result) {
                Some(value) => self.cache.set(AGGREGATE_CACHE_KEY, value, ttls.aggregate()).await,
                None => false,
            }
        };
        let (stored, _) = futures::join!(aggregate_write, fragment_writes);
        stored || self.cache.backend() == CacheBackend::Disabled
    }

    async fn rebuild_from_fragments(&self) -> Option<AggregateResult> {
        let started = Instant::now();
        let reads = join_all(ProviderId::ALL.into_iter().map(|provider| async move {
            let key = provider.cache_key();
            let raw = self.cache.get(&key).await?;
            match serde_json::from_str::<CachedFragment>(&raw) {
                Ok(fragment) => Some(fragment),
                Err(e) => {
                    warn!(key = %key, error = %e, "discarding undecodable cache entry");
                    None
                }
            }
        }))
        .await;

        let mut data = AggregateData::default();
        let mut oldest: Option<UtcDateTime> = None;
        for fragment in reads.into_iter().flatten() {
            oldest = Some(oldest.map_or(fragment.fetched_at, |at| at.min(fragment.fetched_at)));
            data.insert(fragment.payload);
        }
        let oldest = oldest?;

        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let mut result = AggregateResult::new(Uuid::new_v4().to_string(), latency_ms, data, Vec::new());
        result.meta.from_fragments = true;
        result
            .meta
            .push_warning(format!("rebuilt from cached fragments, oldest fetched at {oldest}"));
        debug!(succeeded = result.meta.succeeded.len(), "served aggregate from fragments");
        Some(result)
    }
}

fn serialize_for_cache<T: Serialize>(key: &str, value: &T) -> Option<String> {
    serde_json::to_string(value)
        .map_err(|e| warn!(key = %key, error = %e, "failed to serialize cache entry"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::AtomicU32;

    use crate::cache::MemoryCache;
    use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
    use crate::data_source::FetchError;
    use crate::{NewsDigest, QuoteBatch};

    struct StubSource {
        provider: ProviderId,
        succeed: bool,
        latency: Duration,
        calls: AtomicU32,
        breaker: CircuitBreaker,
    }

    impl StubSource {
        fn new(provider: ProviderId, succeed: bool, latency: Duration) -> Arc<Self> {
            Arc::new(Self {
                provider,
                succeed,
                latency,
                calls: AtomicU32::new(0),
                breaker: CircuitBreaker::new(provider.service_name(), CircuitBreakerConfig::default()),
            })
        }
    }

    impl MarketDataSource for StubSource {
        fn id(&self) -> ProviderId {
            self.provider
        }

        fn fetch<'a>(
            &'a self,
            _options: &'a LiveOptions,
        ) -> Pin<Box<dyn Future<Output = Result<Payload, FetchError>> + Send + 'a>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(self.latency).await;
                if !self.succeed {
                    return Err(ClientError::upstream(503, "unavailable").into());
                }
                Ok(match self.provider {
                    ProviderId::News => Payload::News(NewsDigest {
                        query: String::from("q"),
                        total_results: 0,
                        articles: Vec::new(),
                    }),
                    _ => Payload::Quotes(QuoteBatch { quotes: Vec::new() }),
                })
            })
        }

        fn circuit_breaker_status(&self) -> CircuitStatus {
            self.breaker.status()
        }
    }

    fn service(sources: Vec<Arc<StubSource>>, config: AggregationConfig) -> AggregationService {
        let sources = sources
            .into_iter()
            .map(|source| source as Arc<dyn MarketDataSource>)
            .collect();
        AggregationService::new(sources, Arc::new(MemoryCache::new()), config).expect("valid service")
    }

    fn stubs(latency: Duration) -> Vec<Arc<StubSource>> {
        ProviderId::ALL
            .into_iter()
            .map(|provider| StubSource::new(provider, true, latency))
            .collect()
    }

    #[test]
    fn aggregate_ttl_is_the_smallest_category_ttl() {
        assert_eq!(CacheTtls::default().aggregate(), Duration::from_secs(30));
    }

    #[test]
    fn rejects_duplicate_and_missing_sources() {
        let mut sources = stubs(Duration::ZERO);
        sources.pop();
        let missing = AggregationService::new(
            sources.iter().map(|s| Arc::clone(s) as Arc<dyn MarketDataSource>).collect(),
            Arc::new(MemoryCache::new()),
            AggregationConfig::default(),
        )
        .expect_err("quotes missing");
        assert_eq!(missing, ValidationError::MissingProvider { provider: "quotes" });

        sources.push(StubSource::new(ProviderId::News, true, Duration::ZERO));
        let duplicate = AggregationService::new(
            sources.into_iter().map(|s| s as Arc<dyn MarketDataSource>).collect(),
            Arc::new(MemoryCache::new()),
            AggregationConfig::default(),
        )
        .expect_err("news twice");
        assert_eq!(duplicate, ValidationError::DuplicateProvider { provider: "news" });
    }

    #[tokio::test]
    async fn wrong_slot_payload_is_recorded_as_malformed() {
        let service = service(stubs(Duration::ZERO), AggregationConfig::default());

        let result = service.get_live(&LiveOptions::default()).await;

        assert!(result.data.news.is_some());
        assert!(result.data.quotes.is_some());
        assert_eq!(result.meta.succeeded, vec![ProviderId::News, ProviderId::Quotes]);
        assert_eq!(result.status, AggregateStatus::Partial);
        assert!(result
            .errors
            .iter()
            .all(|failure| failure.code == "client.malformed_response"));
    }

    #[tokio::test]
    async fn deadline_marks_slow_providers_without_waiting_for_them() {
        let mut sources = stubs(Duration::ZERO);
        sources[2] = StubSource::new(ProviderId::Forex, true, Duration::from_secs(30));
        let config = AggregationConfig {
            deadline: Duration::from_millis(50),
            ..AggregationConfig::default()
        };
        let service = service(sources, config);

        let started = Instant::now();
        let result = service.get_live(&LiveOptions::default()).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        let forex = result
            .errors
            .iter()
            .find(|failure| failure.provider == ProviderId::Forex)
            .expect("forex failure recorded");
        assert_eq!(forex.code, "aggregate.deadline_exceeded");
    }

    #[tokio::test]
    async fn identical_concurrent_calls_share_one_pass() {
        let sources = stubs(Duration::from_millis(50));
        let news = Arc::clone(&sources[3]);
        let service = service(sources, AggregationConfig::default());
        let options = LiveOptions::default();

        let (first, second) = tokio::join!(service.get_live(&options), service.get_live(&options));

        assert_eq!(news.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn single_flight_can_be_disabled() {
        let sources = stubs(Duration::from_millis(20));
        let news = Arc::clone(&sources[3]);
        let config = AggregationConfig {
            single_flight: false,
            ..AggregationConfig::default()
        };
        let service = service(sources, config);
        let options = LiveOptions::default();

        let _ = tokio::join!(service.get_live(&options), service.get_live(&options));
        assert_eq!(news.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn total_failure_keeps_last_good_aggregate() {
        let sources: Vec<_> = ProviderId::ALL
            .into_iter()
            .map(|provider| StubSource::new(provider, false, Duration::ZERO))
            .collect();
        let service = service(sources, AggregationConfig::default());

        let result = service.get_live(&LiveOptions::default()).await;
        assert_eq!(result.status, AggregateStatus::Error);
        assert_eq!(result.errors.len(), 6);
        assert!(result.meta.warnings.is_empty());
        assert_eq!(service.get_cached().await, None);
        assert_eq!(service.recent_failures().len(), 6);
    }

    #[tokio::test]
    async fn fragments_rebuild_an_aggregate_after_the_aggregate_key_is_gone() {
        let service = service(stubs(Duration::ZERO), AggregationConfig::default());
        service.get_live(&LiveOptions::default()).await;

        // Simulate the aggregate key expiring before the fragments.
        service.cache.set(AGGREGATE_CACHE_KEY, String::from("not json"), Duration::from_secs(5)).await;

        let rebuilt = service.get_cached().await.expect("fragments are fresh");
        assert!(rebuilt.meta.from_fragments);
        assert!(rebuilt.data.news.is_some());
        assert!(rebuilt.data.quotes.is_some());
        assert_eq!(rebuilt.status, AggregateStatus::Partial);
    }
}
