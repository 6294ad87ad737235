//! # Marketlens Core
//!
//! Resilient multi-provider market data aggregation.
//!
//! ## Overview
//!
//! One aggregation pass fetches six independent categories concurrently and
//! merges whatever arrives into a single envelope:
//!
//! - **Provider adapters** normalize each upstream's wire format
//! - **Circuit breakers** (one per provider) stop calling a failing upstream
//! - **Retry and rate budgets** bound how hard each upstream is hit
//! - **Cache** keeps the last good aggregate and per-category fragments
//!
//! A single failing provider never fails the pass: its slot is `null` and the
//! failure is recorded in the envelope and the audit trail.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Alpha Vantage, CoinGecko, ExchangeRate-API, NewsAPI, FRED, Finnhub |
//! | [`aggregation`] | Fan-out, merge, single-flight and cache writes |
//! | [`audit`] | Bounded trail of provider failures |
//! | [`builder`] | Service wiring from configuration |
//! | [`cache`] | Cache trait with memory and disabled backends |
//! | [`circuit_breaker`] | Per-provider circuit breaker |
//! | [`client`] | Shared provider client plumbing |
//! | [`config`] | TOML configuration |
//! | [`data_source`] | Adapter contract and client error taxonomy |
//! | [`domain`] | Normalized payload types |
//! | [`envelope`] | Aggregate envelope and failure records |
//! | [`error`] | Core error types |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`provider_policy`] | Free-tier request budgets |
//! | [`redis_cache`] | Redis cache backend |
//! | [`retry`] | Backoff policy |
//! | [`source`] | Provider identifiers |
//! | [`throttling`] | Local rate budgets |
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │  AggregationService  │──── Cache (memory / redis / disabled)
//! └──────────┬───────────┘
//!            │ join_all, one deadline
//!            ▼
//! ┌──────────────────────┐     ┌──────────────────┐
//! │ MarketDataSource x6  │────▶│ Circuit Breaker  │
//! └──────────┬───────────┘     └──────────────────┘
//!            │
//!            ▼
//! ┌──────────────────────┐
//! │ ProviderClient       │  rate budget, retry, timeout
//! │ HttpClient (reqwest) │
//! └──────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use marketlens_core::{AggregationServiceBuilder, AppConfig, LiveOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = AggregationServiceBuilder::from_config(AppConfig::load(None)?)
//!         .build()
//!         .await?;
//!
//!     let aggregate = service.get_live(&LiveOptions::default()).await;
//!     println!("{} ({} providers ok)", aggregate.status, aggregate.meta.succeeded.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Security
//!
//! API keys come from the config file or environment variables and are
//! redacted from `Debug` output and logs.

pub mod adapters;
pub mod aggregation;
pub mod audit;
pub mod builder;
pub mod cache;
pub mod circuit_breaker;
pub mod client;
pub mod config;
pub mod data_source;
pub mod domain;
pub mod envelope;
pub mod error;
pub mod http_client;
pub mod provider_policy;
pub mod redis_cache;
pub mod retry;
pub mod source;
pub mod throttling;

// Adapter implementations
pub use adapters::{
    AlphaVantageAdapter, CoinGeckoAdapter, ExchangeRateAdapter, FinnhubAdapter, FredAdapter,
    NewsApiAdapter,
};

// Aggregation
pub use aggregation::{AggregationConfig, AggregationService, CacheTtls, AGGREGATE_CACHE_KEY};
pub use audit::AuditLog;
pub use builder::AggregationServiceBuilder;

// Caching
pub use cache::{Cache, CacheBackend, CacheUnavailableError, DisabledCache, MemoryCache};
pub use redis_cache::RedisCache;

// Circuit breaker
pub use circuit_breaker::{
    BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitOpenError, CircuitState,
    CircuitStatus, StateTransition, TransitionObserver,
};

// Client plumbing
pub use client::ProviderClient;
pub use config::{AppConfig, ConfigError, ProviderSettings};

// Adapter contract
pub use data_source::{
    ClientError, ClientErrorKind, FetchError, LiveOptions, MarketDataSource, Payload,
};

// Domain models
pub use domain::{
    validate_calendar_date, validate_currency_code, CryptoPrice, CryptoPrices,
    EconomicObservation, EconomicSeries, EquityQuote, ForexRates, NewsArticle, NewsDigest, Quote,
    QuoteBatch, Symbol, UtcDateTime,
};

// Envelope types
pub use envelope::{
    AggregateData, AggregateMeta, AggregateResult, AggregateStatus, FailureKind, ProviderFailure,
    SCHEMA_VERSION,
};

// Error types
pub use error::{CoreError, ValidationError};

// HTTP client types
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpErrorKind, HttpMethod, HttpRequest, HttpResponse,
    ReqwestHttpClient,
};

pub use provider_policy::ProviderPolicy;
pub use retry::{Backoff, RetryConfig};
pub use source::ProviderId;
pub use throttling::RateBudget;
