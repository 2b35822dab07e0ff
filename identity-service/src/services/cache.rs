//! Read-through cache for single Identity and Token records.
//!
//! `RecordCache` is the raw key/value capability; `CachedRecords` is the typed
//! view the services use. A cache failure is always treated as a miss.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use redis::{aio::ConnectionManager, Client};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::metrics::CACHE_REQUESTS_TOTAL;

#[async_trait]
pub trait RecordCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error>;
    async fn put(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), anyhow::Error>;
    async fn invalidate(&self, key: &str) -> Result<(), anyhow::Error>;
    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct RedisCache {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisCache {
    pub async fn new(url: &str) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(url)?;

        // Use ConnectionManager for automatic reconnection
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }
}

#[async_trait]
impl RecordCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get cache: {}", e))
    }

    async fn put(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds.max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to set cache: {}", e))
    }

    async fn invalidate(&self, key: &str) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to invalidate cache: {}", e))
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

const MAX_MEMORY_TTL_SECONDS: u64 = 30 * 24 * 3600;

/// Process-local cache with per-entry expiry.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, (String, DateTime<Utc>)>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl RecordCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let now = Utc::now();
        let value = self
            .entries
            .get(key)
            .filter(|entry| entry.1 > now)
            .map(|entry| entry.0.clone());
        if value.is_none() {
            self.entries.remove_if(key, |_, (_, expires)| *expires <= now);
        }
        Ok(value)
    }

    async fn put(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), anyhow::Error> {
        let expires = Utc::now() + Duration::seconds(ttl_seconds.min(MAX_MEMORY_TTL_SECONDS) as i64);
        self.entries
            .insert(key.to_string(), (value.to_string(), expires));
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> Result<(), anyhow::Error> {
        self.entries.remove(key);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

/// Cache that never holds anything; every read goes to the store.
pub struct NoopCache;

#[async_trait]
impl RecordCache for NoopCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, anyhow::Error> {
        Ok(None)
    }

    async fn put(&self, _key: &str, _value: &str, _ttl_seconds: u64) -> Result<(), anyhow::Error> {
        Ok(())
    }

    async fn invalidate(&self, _key: &str) -> Result<(), anyhow::Error> {
        Ok(())
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

/// Typed, failure-tolerant view over a `RecordCache`.
#[derive(Clone)]
pub struct CachedRecords {
    cache: Arc<dyn RecordCache>,
    ttl_seconds: u64,
}

impl CachedRecords {
    pub fn new(cache: Arc<dyn RecordCache>, ttl_seconds: u64) -> Self {
        Self { cache, ttl_seconds }
    }

    pub fn identity_key(namespace: &str, uuid: Uuid) -> String {
        format!("identity:{}:{}", namespace, uuid)
    }

    pub fn token_key(namespace: &str, uuid: Uuid) -> String {
        format!("token:{}:{}", namespace, uuid)
    }

    pub async fn fetch<T: DeserializeOwned>(&self, record: &'static str, key: &str) -> Option<T> {
        let raw = match self.cache.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                CACHE_REQUESTS_TOTAL.with_label_values(&[record, "miss"]).inc();
                return None;
            }
            Err(e) => {
                tracing::warn!(record, error = %e, "Cache read failed, falling back to store");
                CACHE_REQUESTS_TOTAL.with_label_values(&[record, "error"]).inc();
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => {
                CACHE_REQUESTS_TOTAL.with_label_values(&[record, "hit"]).inc();
                Some(value)
            }
            Err(e) => {
                tracing::warn!(record, error = %e, "Discarding undecodable cache entry");
                CACHE_REQUESTS_TOTAL.with_label_values(&[record, "error"]).inc();
                self.invalidate(record, key).await;
                None
            }
        }
    }

    pub async fn store<T: Serialize>(&self, record: &'static str, key: &str, value: &T) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(record, error = %e, "Failed to encode cache entry");
                return;
            }
        };
        if let Err(e) = self.cache.put(key, &raw, self.ttl_seconds).await {
            tracing::warn!(record, error = %e, "Cache write failed");
            CACHE_REQUESTS_TOTAL.with_label_values(&[record, "error"]).inc();
        }
    }

    pub async fn invalidate(&self, record: &'static str, key: &str) {
        if let Err(e) = self.cache.invalidate(key).await {
            tracing::warn!(record, error = %e, "Cache invalidation failed");
            CACHE_REQUESTS_TOTAL.with_label_values(&[record, "error"]).inc();
        }
    }

    pub async fn health_check(&self) -> Result<(), anyhow::Error> {
        self.cache.health_check().await
    }
}
