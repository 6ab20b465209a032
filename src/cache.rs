use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use dashmap::DashMap;
use redis::{AsyncCommands, aio::ConnectionManager};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::db::Bike;

/// Key holding the serialized list of currently available bikes.
pub const AVAILABLE_BIKES: &str = "available_bikes";

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> anyhow::Result<()>;
    async fn invalidate(&self, key: &str) -> anyhow::Result<()>;
}

/// In-process backend, used when no Redis URL is configured.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, (String, Instant)>,
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let now = Instant::now();
        // remove_if keeps the expiry check and the eviction under one shard lock
        if self.entries.remove_if(key, |_, (_, expires)| *expires <= now).is_some() {
            return Ok(None);
        }
        Ok(self.entries.get(key).map(|entry| entry.0.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> anyhow::Result<()> {
        self.entries.insert(key.to_owned(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> anyhow::Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }
}

/// Read cache for the available-bikes listing.
///
/// Backend failures are logged and treated as misses; the store stays the
/// source of truth.
#[derive(Clone)]
pub struct ListingCache {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
}

impl ListingCache {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    pub async fn available(&self) -> Option<Vec<Bike>> {
        let raw = match self.backend.get(AVAILABLE_BIKES).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!(error = %err, "listing cache unavailable, reading from store");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(bikes) => {
                debug!("listing cache hit");
                Some(bikes)
            }
            Err(err) => {
                warn!(error = %err, "discarding undecodable listing cache entry");
                None
            }
        }
    }

    pub async fn store_available(&self, bikes: &[Bike]) {
        let raw = match serde_json::to_string(bikes) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %err, "could not encode bike listing for cache");
                return;
            }
        };

        if let Err(err) = self.backend.set(AVAILABLE_BIKES, raw, self.ttl).await {
            warn!(error = %err, "listing cache write failed");
        }
    }

    /// Must run after the store write that changed availability.
    pub async fn invalidate_available(&self) {
        if let Err(err) = self.backend.invalidate(AVAILABLE_BIKES).await {
            warn!(error = %err, "listing cache invalidation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::VerificationState;
    use uuid::Uuid;

    struct BrokenCache;

    #[async_trait]
    impl CacheBackend for BrokenCache {
        async fn get(&self, _key: &str) -> anyhow::Result<Option<String>> {
            anyhow::bail!("connection refused")
        }

        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }

        async fn invalidate(&self, _key: &str) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }
    }

    fn bike() -> Bike {
        Bike {
            id: Uuid::now_v7(),
            owner_id: Uuid::now_v7(),
            name: "R15".to_owned(),
            bike_number: "MH12".to_owned(),
            price_per_hour: 50.0,
            available: true,
            rented_by: None,
            verification_status: VerificationState::Verified,
            ownership_document: Some("doc.png".to_owned()),
        }
    }

    #[tokio::test]
    async fn stores_and_invalidates_listing() {
        let cache = ListingCache::new(Arc::new(MemoryCache::default()), Duration::from_secs(60));
        assert!(cache.available().await.is_none());

        let bikes = vec![bike()];
        cache.store_available(&bikes).await;
        assert_eq!(cache.available().await, Some(bikes));

        cache.invalidate_available().await;
        assert!(cache.available().await.is_none());
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = ListingCache::new(Arc::new(MemoryCache::default()), Duration::from_millis(20));
        cache.store_available(&[bike()]).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.available().await.is_none());
    }

    #[tokio::test]
    async fn broken_backend_degrades_to_miss() {
        let cache = ListingCache::new(Arc::new(BrokenCache), Duration::from_secs(60));
        cache.store_available(&[bike()]).await;
        cache.invalidate_available().await;
        assert!(cache.available().await.is_none());
    }
}
