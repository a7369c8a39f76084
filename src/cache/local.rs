use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::lifecycle::Backend;

// ============================================================================
// In-Process TTL Cache
// ============================================================================
//
// Lookups share a read lock. An entry found expired is removed under the
// write lock after re-checking it, since another writer may have refreshed
// it in between.
//
// Inserts at capacity first drop every expired entry; if the map is still
// full, one arbitrary entry is evicted. The map never holds more than
// `max_items` entries.
//
// ============================================================================

pub struct LocalCache<V> {
    entries: RwLock<HashMap<String, (V, Instant)>>,
    max_items: usize,
    ttl: Duration,
}

impl<V: Clone + Send + Sync> LocalCache<V> {
    pub fn new(max_items: usize, ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::with_capacity(max_items.min(1024))),
            max_items: max_items.max(1),
            ttl,
        }
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return None,
                Some((value, expires_at)) if Instant::now() < *expires_at => {
                    return Some(value.clone());
                }
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some((value, expires_at)) if Instant::now() < *expires_at => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub async fn put(&self, key: &str, value: V) {
        let mut entries = self.entries.write().await;
        let now = Instant::now();

        if !entries.contains_key(key) && entries.len() >= self.max_items {
            entries.retain(|_, (_, expires_at)| now < *expires_at);

            if entries.len() >= self.max_items {
                if let Some(victim) = entries.keys().next().cloned() {
                    entries.remove(&victim);
                }
            }
        }

        entries.insert(key.to_string(), (value, now + self.ttl));
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[async_trait]
impl<V: Clone + Send + Sync + 'static> Backend for LocalCache<V> {
    fn name(&self) -> &'static str {
        "local-cache"
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.clear().await;
        Ok(())
    }
}
