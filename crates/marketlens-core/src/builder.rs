//! Wires an [`AggregationService`] from an [`AppConfig`].

use std::sync::Arc;

use tracing::{info, warn};

use crate::adapters::{adapter_for, default_base_url};
use crate::aggregation::AggregationService;
use crate::cache::{Cache, CacheBackend, DisabledCache, MemoryCache};
use crate::circuit_breaker::TransitionObserver;
use crate::client::ProviderClient;
use crate::config::AppConfig;
use crate::http_client::{HttpClient, ReqwestHttpClient, DEFAULT_USER_AGENT};
use crate::redis_cache::RedisCache;
use crate::throttling::RateBudget;
use crate::{CoreError, ProviderId};

/// Builder for a fully configured aggregation service.
///
/// Defaults: reqwest transport with the configured user agent, no transition
/// observer, and the cache backend named in the config.
pub struct AggregationServiceBuilder {
    config: AppConfig,
    http: Option<Arc<dyn HttpClient>>,
    observer: Option<TransitionObserver>,
    cache: Option<Arc<dyn Cache>>,
}

impl AggregationServiceBuilder {
    pub fn from_config(config: AppConfig) -> Self {
        Self {
            config,
            http: None,
            observer: None,
            cache: None,
        }
    }

    pub fn with_http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    /// Observer attached to all six circuit breakers.
    pub fn with_observer(mut self, observer: TransitionObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Replaces the configured cache backend.
    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// One provider client with breaker, retry, timeout, credentials and budget.
    pub fn provider_client(&self, provider: ProviderId, http: Arc<dyn HttpClient>) -> ProviderClient {
        let settings = self.config.provider(provider);
        let base_url = settings
            .base_url
            .clone()
            .unwrap_or_else(|| String::from(default_base_url(provider)));

        ProviderClient::new(provider, base_url, http)
            .with_api_key(settings.resolve_api_key(provider))
            .with_circuit_breaker(self.config.breaker_config(), self.observer.clone())
            .with_retry(self.config.retry_config())
            .with_request_timeout(self.config.request_timeout())
            .with_rate_budget(settings.policy(provider).as_ref().map(RateBudget::from_policy))
    }

    pub async fn build(self) -> Result<AggregationService, CoreError> {
        self.config.validate()?;

        let http = self.http.clone().unwrap_or_else(|| {
            let user_agent = self
                .config
                .http
                .user_agent
                .as_deref()
                .unwrap_or(DEFAULT_USER_AGENT);
            let client: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::with_user_agent(user_agent));
            client
        });

        let sources = ProviderId::ALL
            .into_iter()
            .map(|provider| adapter_for(self.provider_client(provider, Arc::clone(&http))))
            .collect();

        let cache = match self.cache {
            Some(cache) => cache,
            None => open_cache(&self.config).await,
        };
        info!(cache = %cache.backend(), "aggregation service ready");

        Ok(AggregationService::new(sources, cache, self.config.aggregation_config())?)
    }
}

/// Opens the configured backend. An unreachable Redis degrades to no caching.
pub async fn open_cache(config: &AppConfig) -> Arc<dyn Cache> {
    match config.cache.backend {
        CacheBackend::Memory => Arc::new(MemoryCache::new()),
        CacheBackend::Disabled => Arc::new(DisabledCache),
        CacheBackend::Redis => match RedisCache::connect(&config.cache.redis_url).await {
            Ok(cache) => Arc::new(cache.with_key_prefix(config.cache.key_prefix.clone())),
            Err(error) => {
                warn!(%error, "redis unavailable, caching disabled");
                Arc::new(DisabledCache)
            }
        },
    }
}
