//! Presence tracking backends
//!
//! The in-memory backend is the default and is correct for a single-process
//! deployment. The Redis backend (cargo feature `redis`) shares the counter
//! across processes via INCR/DECR. Presence is ephemeral: a restart of the
//! counting store resets it to zero.

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Debug, thiserror::Error)]
pub enum PresenceError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("store error: {0}")]
    Store(String),
}

/// Counter of currently-subscribed realtime clients. Implementations must
/// mutate only through atomic increment/decrement, never read-modify-write.
#[async_trait]
pub trait PresenceStore: Send + Sync + Debug {
    fn backend_name(&self) -> &'static str;

    /// Increment and return the new count.
    async fn incr(&self) -> Result<i64, PresenceError>;

    /// Decrement and return the new count.
    async fn decr(&self) -> Result<i64, PresenceError>;

    async fn current(&self) -> Result<i64, PresenceError>;
}

#[derive(Debug, Default)]
pub struct InMemoryPresence {
    count: AtomicI64,
}

impl InMemoryPresence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceStore for InMemoryPresence {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn incr(&self) -> Result<i64, PresenceError> {
        Ok(self.count.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn decr(&self) -> Result<i64, PresenceError> {
        Ok(self.count.fetch_sub(1, Ordering::SeqCst) - 1)
    }

    async fn current(&self) -> Result<i64, PresenceError> {
        Ok(self.count.load(Ordering::SeqCst))
    }
}

#[cfg(feature = "redis")]
mod redis_store {
    use super::*;
    use futures::lock::Mutex;
    use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
    use std::sync::Arc;

    const ONLINE_KEY: &str = "presence:online";

    #[derive(Debug)]
    pub struct RedisPresence {
        conn: Arc<Mutex<MultiplexedConnection>>,
    }

    impl RedisPresence {
        pub async fn new(url: &str) -> Result<Self, PresenceError> {
            let client = Client::open(url).map_err(|e| PresenceError::Connection(e.to_string()))?;
            let conn = client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| PresenceError::Connection(e.to_string()))?;
            Ok(Self {
                conn: Arc::new(Mutex::new(conn)),
            })
        }
    }

    #[async_trait]
    impl PresenceStore for RedisPresence {
        fn backend_name(&self) -> &'static str {
            "redis"
        }

        async fn incr(&self) -> Result<i64, PresenceError> {
            let mut conn = self.conn.lock().await;
            let count: i64 = conn
                .incr(ONLINE_KEY, 1)
                .await
                .map_err(|e: redis::RedisError| PresenceError::Store(e.to_string()))?;
            Ok(count)
        }

        async fn decr(&self) -> Result<i64, PresenceError> {
            let mut conn = self.conn.lock().await;
            let count: i64 = conn
                .decr(ONLINE_KEY, 1)
                .await
                .map_err(|e: redis::RedisError| PresenceError::Store(e.to_string()))?;
            Ok(count)
        }

        async fn current(&self) -> Result<i64, PresenceError> {
            let mut conn = self.conn.lock().await;
            let count: Option<i64> = conn
                .get(ONLINE_KEY)
                .await
                .map_err(|e: redis::RedisError| PresenceError::Store(e.to_string()))?;
            Ok(count.unwrap_or(0))
        }
    }
}

#[cfg(feature = "redis")]
pub use redis_store::RedisPresence;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn counts_up_and_down() {
        let store = InMemoryPresence::new();
        assert_eq!(store.incr().await.unwrap(), 1);
        assert_eq!(store.incr().await.unwrap(), 2);
        assert_eq!(store.decr().await.unwrap(), 1);
        assert_eq!(store.current().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_increments_do_not_lose_updates() {
        let store = Arc::new(InMemoryPresence::new());

        let mut handles = Vec::new();
        for _ in 0..64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.incr().await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.current().await.unwrap(), 64);
    }
}
