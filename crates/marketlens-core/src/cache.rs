//! TTL cache contract and in-process backends.
//!
//! Cache backends never fail their callers: an unavailable backend turns reads
//! into misses and writes into no-ops, and reports the incident through a
//! logged [`CacheUnavailableError`].

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

/// Cache implementation selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    Redis,
    Disabled,
}

impl CacheBackend {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Redis => "redis",
            Self::Disabled => "disabled",
        }
    }
}

impl Display for CacheBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Infrastructure failure inside a cache backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{backend} cache unavailable during {operation}: {message}")]
pub struct CacheUnavailableError {
    pub backend: CacheBackend,
    pub operation: &'static str,
    pub message: String,
}

impl CacheUnavailableError {
    pub fn new(backend: CacheBackend, operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            backend,
            operation,
            message: message.into(),
        }
    }

    /// Records the degradation. Callers continue as on a miss or no-op.
    pub fn log(&self) {
        warn!(
            backend = %self.backend,
            operation = self.operation,
            error = %self.message,
            "cache degraded"
        );
    }
}

/// Key/value store with per-entry TTL.
///
/// `set` reports whether the value was stored; `clear` whether the store was
/// emptied. Neither ever errors.
pub trait Cache: Send + Sync {
    fn backend(&self) -> CacheBackend;

    fn get<'a>(&'a self, key: &'a str) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>>;

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: String,
        ttl: Duration,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

    fn clear<'a>(&'a self) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    body: String,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Thread-safe in-memory cache.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    inner: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every expired entry.
    pub async fn clear_expired(&self) {
        let now = Instant::now();
        self.inner.write().await.retain(|_, entry| entry.is_fresh(now));
    }

    /// Number of unexpired entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.inner
            .read()
            .await
            .values()
            .filter(|entry| entry.is_fresh(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Cache for MemoryCache {
    fn backend(&self) -> CacheBackend {
        CacheBackend::Memory
    }

    fn get<'a>(&'a self, key: &'a str) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>> {
        Box::pin(async move {
            let store = self.inner.read().await;
            store
                .get(key)
                .filter(|entry| entry.is_fresh(Instant::now()))
                .map(|entry| entry.body.clone())
        })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: String,
        ttl: Duration,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            if ttl.is_zero() {
                return false;
            }
            let Some(expires_at) = Instant::now().checked_add(ttl) else {
                return false;
            };
            self.inner.write().await.insert(
                key.to_owned(),
                CacheEntry {
                    body: value,
                    expires_at,
                },
            );
            true
        })
    }

    fn clear<'a>(&'a self) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            self.inner.write().await.clear();
            true
        })
    }
}

/// Cache that stores nothing: every read misses, every write is refused.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledCache;

impl Cache for DisabledCache {
    fn backend(&self) -> CacheBackend {
        CacheBackend::Disabled
    }

    fn get<'a>(&'a self, _key: &'a str) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>> {
        Box::pin(async { None })
    }

    fn set<'a>(
        &'a self,
        _key: &'a str,
        _value: String,
        _ttl: Duration,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async { false })
    }

    fn clear<'a>(&'a self) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async { true })
    }
}
