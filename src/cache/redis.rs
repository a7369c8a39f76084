use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::Duration;

use crate::config::RedisCacheConfig;
use crate::lifecycle::Backend;
use crate::models::Order;

/// Shared order cache in Redis, values stored as JSON with `SET .. EX`.
///
/// Redis failures never reach the caller: a failed read is a miss and a
/// failed write is dropped.
pub struct RedisCache {
    conn: MultiplexedConnection,
    ttl_secs: u64,
}

impl RedisCache {
    pub async fn connect(config: &RedisCacheConfig) -> anyhow::Result<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        let conn = client.get_multiplexed_async_connection().await?;

        tracing::info!(ttl_ms = config.ttl_ms, "Connected to Redis cache");

        Ok(Self {
            conn,
            ttl_secs: ttl_secs(config.ttl()),
        })
    }

    pub async fn get(&self, key: &str) -> Option<Order> {
        let mut conn = self.conn.clone();
        let data = match conn.get::<_, Option<String>>(key).await {
            Ok(data) => data?,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Redis get error");
                return None;
            }
        };

        match serde_json::from_str(&data) {
            Ok(order) => Some(order),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache deserialization failed");
                let _ = conn.del::<_, ()>(key).await;
                None
            }
        }
    }

    pub async fn put(&self, key: &str, value: Order) {
        let data = match serde_json::to_string(&value) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache serialization failed");
                return;
            }
        };

        let mut conn = self.conn.clone();
        if let Err(e) = conn.set_ex::<_, _, ()>(key, data, self.ttl_secs).await {
            tracing::warn!(key = %key, error = %e, "Redis set error");
        }
    }
}

/// Redis expiry is in whole seconds, rounded down with a floor of one
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl Backend for RedisCache {
    fn name(&self) -> &'static str {
        "redis-cache"
    }

    async fn close(&self) -> anyhow::Result<()> {
        // Multiplexed connections close when the last handle is dropped.
        Ok(())
    }
}
