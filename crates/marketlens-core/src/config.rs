//! Application configuration.
//!
//! Every section is optional; a missing file section falls back to the
//! built-in defaults field by field.
//!
//! ```toml
//! [breaker]
//! failure_threshold = 3
//! open_timeout_ms = 30000
//!
//! [cache]
//! backend = "redis"
//! redis_url = "redis://127.0.0.1:6379/0"
//! key_prefix = "marketlens:"
//!
//! [cache.ttl]
//! news = 900
//!
//! [providers.equities]
//! api_key_env = "ALPHA_VANTAGE_KEY"
//! quota_limit = 5
//! quota_window_secs = 60
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::aggregation::{AggregationConfig, CacheTtls};
use crate::cache::CacheBackend;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::provider_policy::ProviderPolicy;
use crate::redis_cache::{DEFAULT_KEY_PREFIX, DEFAULT_REDIS_URL};
use crate::retry::{Backoff, RetryConfig};
use crate::ProviderId;

/// Environment variable consulted when no explicit config path is given.
pub const CONFIG_PATH_ENV: &str = "MARKETLENS_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Root of the TOML document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub breaker: BreakerSettings,
    pub http: HttpSettings,
    pub retry: RetrySettings,
    pub cache: CacheSettings,
    pub aggregation: AggregationSettings,
    pub providers: BTreeMap<ProviderId, ProviderSettings>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BreakerSettings {
    /// Consecutive failures that open a provider's circuit. Default: 3.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Time an open circuit rejects calls before admitting a probe. Default: 30 s.
    #[serde(default = "default_open_timeout_ms")]
    pub open_timeout_ms: u64,
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_open_timeout_ms() -> u64 {
    30_000
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            open_timeout_ms: default_open_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpSettings {
    /// Per-request timeout. Default: 5 s.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub user_agent: Option<String>,
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    /// Extra attempts after the first; 0 disables retries. Default: 2.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_max_retries() -> u32 {
    2
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    2_000
}

fn default_jitter() -> bool {
    true
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSettings {
    #[serde(default)]
    pub backend: CacheBackend,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// Namespace for Redis keys; `flush` deletes only keys under it.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default)]
    pub ttl: TtlSettings,
}

fn default_redis_url() -> String {
    String::from(DEFAULT_REDIS_URL)
}

fn default_key_prefix() -> String {
    String::from(DEFAULT_KEY_PREFIX)
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
            ttl: TtlSettings::default(),
        }
    }
}

/// Cache lifetimes in seconds, one per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TtlSettings {
    pub equities: u64,
    pub crypto: u64,
    pub forex: u64,
    pub news: u64,
    pub economic: u64,
    pub quotes: u64,
}

impl Default for TtlSettings {
    fn default() -> Self {
        let ttls = CacheTtls::default();
        Self {
            equities: ttls.equities.as_secs(),
            crypto: ttls.crypto.as_secs(),
            forex: ttls.forex.as_secs(),
            news: ttls.news.as_secs(),
            economic: ttls.economic.as_secs(),
            quotes: ttls.quotes.as_secs(),
        }
    }
}

impl TtlSettings {
    pub const fn to_ttls(self) -> CacheTtls {
        CacheTtls {
            equities: Duration::from_secs(self.equities),
            crypto: Duration::from_secs(self.crypto),
            forex: Duration::from_secs(self.forex),
            news: Duration::from_secs(self.news),
            economic: Duration::from_secs(self.economic),
            quotes: Duration::from_secs(self.quotes),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregationSettings {
    /// Upper bound for one aggregation pass. Default: 10 s.
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
    #[serde(default = "default_single_flight")]
    pub single_flight: bool,
    #[serde(default = "default_audit_capacity")]
    pub audit_capacity: usize,
}

fn default_deadline_ms() -> u64 {
    10_000
}

fn default_single_flight() -> bool {
    true
}

fn default_audit_capacity() -> usize {
    crate::audit::DEFAULT_AUDIT_CAPACITY
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            deadline_ms: default_deadline_ms(),
            single_flight: default_single_flight(),
            audit_capacity: default_audit_capacity(),
        }
    }
}

/// Per-provider overrides. Unset fields keep the provider's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderSettings {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// Environment variable read when `api_key` is unset.
    pub api_key_env: Option<String>,
    pub quota_limit: Option<u32>,
    pub quota_window_secs: Option<u64>,
}

impl ProviderSettings {
    /// Credential lookup order: file, `api_key_env`, then
    /// `MARKETLENS_<PROVIDER>_API_KEY`. Blank values count as unset.
    pub fn resolve_api_key(&self, provider: ProviderId) -> Option<String> {
        self.resolve_api_key_with(provider, |name| std::env::var(name).ok())
    }

    /// [`Self::resolve_api_key`] reading variables through `lookup`.
    pub fn resolve_api_key_with(
        &self,
        provider: ProviderId,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Option<String> {
        let non_blank = |value: String| {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_owned())
        };

        if let Some(key) = self.api_key.clone().and_then(non_blank) {
            return Some(key);
        }
        if let Some(var) = &self.api_key_env {
            if let Some(key) = lookup(var).and_then(non_blank) {
                return Some(key);
            }
        }
        lookup(provider.api_key_env()).and_then(non_blank)
    }

    /// Local rate budget: an explicit limit wins, otherwise the free-tier default.
    pub fn policy(&self, provider: ProviderId) -> Option<ProviderPolicy> {
        let default = ProviderPolicy::default_for(provider);
        match self.quota_limit {
            Some(limit) => {
                let window = self
                    .quota_window_secs
                    .map(Duration::from_secs)
                    .or(default.as_ref().map(|policy| policy.quota_window))
                    .unwrap_or(Duration::from_secs(60));
                Some(ProviderPolicy::new(provider, limit, window))
            }
            None => default.map(|policy| match self.quota_window_secs {
                Some(secs) => ProviderPolicy::new(provider, policy.quota_limit, Duration::from_secs(secs)),
                None => policy,
            }),
        }
    }
}

impl AppConfig {
    /// Resolution order: explicit path, then `MARKETLENS_CONFIG`, then defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, |name| std::env::var(name).ok())
    }

    /// [`Self::load`] reading `MARKETLENS_CONFIG` through `lookup`.
    pub fn load_with(
        path: Option<&Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        match lookup(CONFIG_PATH_ENV) {
            Some(path) if !path.trim().is_empty() => Self::from_file(Path::new(path.trim())),
            _ => {
                debug!("no config file given, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid(message));

        if self.breaker.failure_threshold == 0 {
            return invalid(String::from("breaker.failure_threshold must be at least 1"));
        }
        if self.breaker.open_timeout_ms == 0 {
            return invalid(String::from("breaker.open_timeout_ms must be positive"));
        }
        if self.http.request_timeout_ms == 0 {
            return invalid(String::from("http.request_timeout_ms must be positive"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return invalid(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            ));
        }
        if self.aggregation.deadline_ms == 0 {
            return invalid(String::from("aggregation.deadline_ms must be positive"));
        }
        if self.cache.backend == CacheBackend::Redis && self.cache.redis_url.trim().is_empty() {
            return invalid(String::from("cache.redis_url is required for the redis backend"));
        }
        if self.cache.key_prefix.trim().is_empty() {
            return invalid(String::from("cache.key_prefix must not be empty"));
        }
        let ttl = self.cache.ttl;
        for (provider, secs) in [
            (ProviderId::Equities, ttl.equities),
            (ProviderId::Crypto, ttl.crypto),
            (ProviderId::Forex, ttl.forex),
            (ProviderId::News, ttl.news),
            (ProviderId::Economic, ttl.economic),
            (ProviderId::Quotes, ttl.quotes),
        ] {
            if secs == 0 {
                return invalid(format!("cache.ttl.{provider} must be positive"));
            }
        }

        for (provider, settings) in &self.providers {
            if let Some(url) = &settings.base_url {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return invalid(format!(
                        "providers.{provider}.base_url must be an http(s) URL: '{url}'"
                    ));
                }
            }
            if settings.quota_limit == Some(0) {
                return invalid(format!("providers.{provider}.quota_limit must be at least 1"));
            }
            if settings.quota_window_secs == Some(0) {
                return invalid(format!("providers.{provider}.quota_window_secs must be positive"));
            }
        }
        Ok(())
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.breaker.failure_threshold,
            open_timeout: Duration::from_millis(self.breaker.open_timeout_ms),
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            enabled: self.retry.max_retries > 0,
            max_retries: self.retry.max_retries,
            backoff: Backoff::Exponential {
                base: Duration::from_millis(self.retry.base_delay_ms),
                factor: 2.0,
                max: Duration::from_millis(self.retry.max_delay_ms),
                jitter: self.retry.jitter,
            },
        }
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.http.request_timeout_ms)
    }

    pub fn aggregation_config(&self) -> AggregationConfig {
        AggregationConfig {
            deadline: Duration::from_millis(self.aggregation.deadline_ms),
            single_flight: self.aggregation.single_flight,
            audit_capacity: self.aggregation.audit_capacity,
            ttls: self.cache.ttl.to_ttls(),
        }
    }

    /// Overrides for `provider`, or the defaults when the section is absent.
    pub fn provider(&self, provider: ProviderId) -> ProviderSettings {
        self.providers.get(&provider).cloned().unwrap_or_default()
    }
}
