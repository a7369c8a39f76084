// ============================================================================
// Cache - read-path acceleration for stored orders
// ============================================================================
//
// The cache is advisory: a miss is always answered by storage, and no cache
// failure is ever surfaced to an API caller.
//
// ============================================================================

mod local;
mod redis;

pub use self::local::LocalCache;
pub use self::redis::RedisCache;

use async_trait::async_trait;

use crate::lifecycle::Backend;
use crate::models::Order;

#[async_trait]
pub trait Cache: Backend {
    /// Copy of the live entry for `key`, if any
    async fn get(&self, key: &str) -> Option<Order>;

    /// Insert or overwrite `key`, restarting its time to live
    async fn put(&self, key: &str, value: Order);
}

/// Cache selected by `CACHE_TYPE`
pub enum CacheBackend {
    Local(LocalCache<Order>),
    Redis(RedisCache),
}

#[async_trait]
impl Backend for CacheBackend {
    fn name(&self) -> &'static str {
        match self {
            CacheBackend::Local(cache) => cache.name(),
            CacheBackend::Redis(cache) => cache.name(),
        }
    }

    async fn close(&self) -> anyhow::Result<()> {
        match self {
            CacheBackend::Local(cache) => cache.close().await,
            CacheBackend::Redis(cache) => cache.close().await,
        }
    }
}

#[async_trait]
impl Cache for CacheBackend {
    async fn get(&self, key: &str) -> Option<Order> {
        match self {
            CacheBackend::Local(cache) => cache.get(key).await,
            CacheBackend::Redis(cache) => cache.get(key).await,
        }
    }

    async fn put(&self, key: &str, value: Order) {
        match self {
            CacheBackend::Local(cache) => cache.put(key, value).await,
            CacheBackend::Redis(cache) => cache.put(key, value).await,
        }
    }
}
