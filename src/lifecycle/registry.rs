use anyhow::Context;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheBackend, LocalCache, RedisCache};
use crate::config::{
    BrokerKind, CacheKind, KafkaConfig, LocalCacheConfig, PostgresConfig, RedisCacheConfig,
    StorageKind,
};
use crate::messaging::KafkaBroker;
use crate::metrics::Metrics;
use crate::storage::PgStorage;

// ============================================================================
// Backend Registry
// ============================================================================
//
// Maps each `*_TYPE` value to its constructor. A backend's own configuration
// section is read only when that backend is selected.
//
// ============================================================================

pub async fn build_storage(
    kind: StorageKind,
    shutdown: CancellationToken,
) -> anyhow::Result<PgStorage> {
    match kind {
        StorageKind::Postgres => {
            let config = PostgresConfig::from_env()?;
            tracing::info!(?config, "Starting PostgreSQL storage");
            let storage = PgStorage::connect(&config, shutdown)
                .await
                .context("failed to connect to PostgreSQL")?;
            Ok(storage)
        }
    }
}

pub async fn build_broker(
    kind: BrokerKind,
    metrics: Arc<Metrics>,
) -> anyhow::Result<KafkaBroker> {
    match kind {
        BrokerKind::Kafka => {
            let config = KafkaConfig::from_env()?;
            let broker = KafkaBroker::new(&config, metrics).context("failed to create Kafka consumer")?;
            Ok(broker)
        }
    }
}

pub async fn build_cache(kind: CacheKind) -> anyhow::Result<CacheBackend> {
    match kind {
        CacheKind::Local => {
            let config = LocalCacheConfig::from_env()?;
            tracing::info!(
                max_items = config.max_items,
                ttl_ms = config.ttl_ms,
                "Starting local cache"
            );
            Ok(CacheBackend::Local(LocalCache::new(config.max_items, config.ttl())))
        }
        CacheKind::Redis => {
            let config = RedisCacheConfig::from_env()?;
            let cache = RedisCache::connect(&config)
                .await
                .context("failed to connect to Redis")?;
            Ok(CacheBackend::Redis(cache))
        }
    }
}
