use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use tracing::info;

use crate::cache::{Cache, CacheBackend, CacheUnavailableError};

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379/0";

/// Namespace for every key this cache writes.
pub const DEFAULT_KEY_PREFIX: &str = "marketlens:";

const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_millis(500);
const SCAN_BATCH: usize = 500;

/// Redis-backed cache using one multiplexed async connection.
///
/// Values are stored with `SET .. EX`, so Redis enforces expiry. TTLs below a
/// second are rounded up to one second. Keys live under a prefix and `clear`
/// only deletes keys under that prefix, so the database can be shared.
#[derive(Clone)]
pub struct RedisCache {
    connection: MultiplexedConnection,
    operation_timeout: Duration,
    key_prefix: String,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("operation_timeout", &self.operation_timeout)
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self, CacheUnavailableError> {
        let unavailable = |e: redis::RedisError| {
            CacheUnavailableError::new(CacheBackend::Redis, "connect", e.to_string())
        };

        let client = Client::open(url).map_err(unavailable)?;
        let connection = tokio::time::timeout(
            Duration::from_secs(2),
            client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| CacheUnavailableError::new(CacheBackend::Redis, "connect", "timed out"))?
        .map_err(unavailable)?;

        info!("redis cache connection established");
        Ok(Self {
            connection,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            key_prefix: String::from(DEFAULT_KEY_PREFIX),
        })
    }

    pub fn with_operation_timeout(mut self, operation_timeout: Duration) -> Self {
        self.operation_timeout = operation_timeout;
        self
    }

    pub fn with_key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = key_prefix.into();
        self
    }

    fn namespaced(&self, key: &str) -> String {
        namespaced_key(&self.key_prefix, key)
    }

    /// Deletes every key under the prefix with `SCAN MATCH` + `DEL`.
    async fn delete_namespace(&self) -> Result<(), CacheUnavailableError> {
        let pattern = scan_pattern(&self.key_prefix);
        let mut cursor: u64 = 0;
        loop {
            let mut scan = redis::cmd("SCAN");
            scan.arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH);
            let mut conn = self.connection.clone();
            let (next, keys): (u64, Vec<String>) = self
                .run("clear", async move { scan.query_async(&mut conn).await })
                .await?;

            if !keys.is_empty() {
                let mut conn = self.connection.clone();
                let _deleted: usize = self
                    .run("clear", async move { conn.del(keys).await })
                    .await?;
            }
            if next == 0 {
                return Ok(());
            }
            cursor = next;
        }
    }

    /// Runs one command with the operation timeout, folding failures into
    /// [`CacheUnavailableError`].
    async fn run<T, Fut>(&self, operation: &'static str, command: Fut) -> Result<T, CacheUnavailableError>
    where
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.operation_timeout, command).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CacheUnavailableError::new(CacheBackend::Redis, operation, e.to_string())),
            Err(_) => Err(CacheUnavailableError::new(
                CacheBackend::Redis,
                operation,
                format!("no reply within {}ms", self.operation_timeout.as_millis()),
            )),
        }
    }
}

impl Cache for RedisCache {
    fn backend(&self) -> CacheBackend {
        CacheBackend::Redis
    }

    fn get<'a>(&'a self, key: &'a str) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>> {
        Box::pin(async move {
            let key = self.namespaced(key);
            let mut conn = self.connection.clone();
            self.run("get", async move { conn.get::<_, Option<String>>(key).await })
                .await
                .unwrap_or_else(|error| {
                    error.log();
                    None
                })
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
            let seconds = ttl.as_secs().max(1);
            let key = self.namespaced(key);
            let mut conn = self.connection.clone();
            let outcome = self
                .run("set", async move {
                    let stored: () = conn.set_ex(key, value, seconds).await?;
                    Ok(stored)
                })
                .await;
            match outcome {
                Ok(()) => true,
                Err(error) => {
                    error.log();
                    false
                }
            }
        })
    }

    fn clear<'a>(&'a self) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            match self.delete_namespace().await {
                Ok(()) => true,
                Err(error) => {
                    error.log();
                    false
                }
            }
        })
    }
}

fn namespaced_key(prefix: &str, key: &str) -> String {
    format!("{prefix}{key}")
}

fn scan_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('*');
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_written_under_the_prefix() {
        assert_eq!(
            namespaced_key(DEFAULT_KEY_PREFIX, "aggregate:latest"),
            "marketlens:aggregate:latest"
        );
    }

    #[test]
    fn clear_only_matches_the_prefix() {
        assert_eq!(scan_pattern(DEFAULT_KEY_PREFIX), "marketlens:*");
        assert_eq!(scan_pattern("desk[1]:"), "desk\\[1\\]:*");
    }

    #[tokio::test]
    async fn malformed_url_is_reported_as_unavailable() {
        let error = RedisCache::connect("not-a-redis-url")
            .await
            .expect_err("invalid url");
        assert_eq!(error.backend, CacheBackend::Redis);
        assert_eq!(error.operation, "connect");
    }
}
