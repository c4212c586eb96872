use crate::Result;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::time::{timeout, Duration, Instant};

const KEY_PREFIX: &str = "idem:";

/// Reservation store for idempotency keys.
///
/// `reserve` returns true only for the first caller within the key's TTL; every later
/// caller gets false until the key expires or is released.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn reserve(&self, key: &str, ttl: Duration) -> Result<bool>;

    async fn release(&self, key: &str) -> Result<()>;
}

/// Process-local store, for tests and paper trading
#[derive(Debug, Default)]
pub struct InMemoryIdempotencyStore {
    keys: Mutex<HashMap<String, Instant>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn reserve(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut keys = self.keys.lock().map_err(|_| "idempotency store lock poisoned")?;
        keys.retain(|_, expires_at| *expires_at > now);
        if keys.contains_key(key) {
            return Ok(false);
        }
        keys.insert(key.to_string(), now + ttl);
        Ok(true)
    }

    async fn release(&self, key: &str) -> Result<()> {
        let mut keys = self.keys.lock().map_err(|_| "idempotency store lock poisoned")?;
        keys.remove(key);
        Ok(())
    }
}

/// Redis-backed store shared across processes
///
/// Keys are written with `SET key 1 NX PX ttl`, so the reservation and its expiry are
/// a single atomic step on the server.
#[derive(Clone)]
pub struct RedisIdempotencyStore {
    conn: ConnectionManager,
}

impl RedisIdempotencyStore {
    /// Connect to Redis
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;

        // Add 5 second timeout to connection attempt
        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| "Redis connection timeout after 5 seconds")??;

        tracing::info!("Connected to Redis at {}", redis_url);

        Ok(Self { conn })
    }

    fn key(key: &str) -> String {
        format!("{}{}", KEY_PREFIX, key)
    }
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn reserve(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let ttl_ms = ttl.as_millis().max(1) as u64;
        let reply: Option<String> = redis::cmd("SET")
            .arg(Self::key(key))
            .arg(1)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;

        let reserved = reply.is_some();
        if !reserved {
            tracing::debug!("Idempotency key {} already reserved", key);
        }
        Ok(reserved)
    }

    async fn release(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _removed: i64 = redis::cmd("DEL")
            .arg(Self::key(key))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_in_memory_reserve_once_until_expiry() {
        let store = InMemoryIdempotencyStore::new();
        let ttl = Duration::from_secs(30);

        assert!(store.reserve("k1", ttl).await.unwrap());
        assert!(!store.reserve("k1", ttl).await.unwrap());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(store.reserve("k1", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_in_memory_release_frees_key() {
        let store = InMemoryIdempotencyStore::new();
        let ttl = Duration::from_secs(30);

        assert!(store.reserve("k1", ttl).await.unwrap());
        store.release("k1").await.unwrap();
        assert!(store.reserve("k1", ttl).await.unwrap());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_connection_timeout() {
        // Try to connect to non-existent Redis
        let result = RedisIdempotencyStore::new("redis://192.0.2.1:6379").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_redis_reserve_is_exclusive() {
        let store = RedisIdempotencyStore::new("redis://127.0.0.1:6379")
            .await
            .expect("Failed to connect to Redis");

        let key = format!("test-{}", uuid::Uuid::new_v4());
        let ttl = Duration::from_secs(5);

        assert!(store.reserve(&key, ttl).await.unwrap());
        assert!(!store.reserve(&key, ttl).await.unwrap());

        store.release(&key).await.unwrap();
        assert!(store.reserve(&key, ttl).await.unwrap());

        // Cleanup
        store.release(&key).await.unwrap();
    }
}
