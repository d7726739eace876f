use std::future::Future;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};

use crate::config::GatewayConfig;
use crate::storage::{CacheBackend, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The authoritative fetch failed; nothing was cached.
    #[error("Fetch failed: {0}")]
    Fetch(#[source] StorageError),
    /// The cache backend itself failed. Reads fail rather than fall back
    /// to a possibly stale value.
    #[error("Cache backend error: {0}")]
    Cache(#[source] StorageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Profile,
    Drug,
    AccessToken,
}

impl ResourceKind {
    fn prefix(&self) -> &'static str {
        match self {
            ResourceKind::Profile => "profile",
            ResourceKind::Drug => "drug",
            ResourceKind::AccessToken => "token",
        }
    }
}

/// Cache-aside gateway. TTLs are a safety net only; the consistency
/// mechanism is the explicit `invalidate` every authoritative mutation
/// issues before acknowledging success.
#[derive(Clone)]
pub struct CacheGateway {
    cache: CacheBackend,
    profile_ttl: Duration,
    drug_ttl: Duration,
    access_token_ttl: Duration,
}

impl CacheGateway {
    pub fn new(cache: CacheBackend, config: &GatewayConfig) -> Self {
        Self {
            cache,
            profile_ttl: config.profile_ttl,
            drug_ttl: config.drug_ttl,
            access_token_ttl: config.access_token_ttl,
        }
    }

    fn ttl_for(&self, kind: ResourceKind) -> Duration {
        match kind {
            ResourceKind::Profile => self.profile_ttl,
            ResourceKind::Drug => self.drug_ttl,
            ResourceKind::AccessToken => self.access_token_ttl,
        }
    }

    fn build_key(kind: ResourceKind, key: &str) -> String {
        format!("{}:{}", kind.prefix(), key)
    }

    /// Read-through: cached-and-fresh wins, otherwise the authoritative
    /// `fetch` runs and its result is stored. Fetch errors propagate
    /// uncached; a failed cache write only logs, since the value itself is
    /// already in hand.
    pub async fn get_or_fetch<T, F, Fut>(&self, kind: ResourceKind, key: &str, fetch: F) -> Result<T, GatewayError>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let cache_key = Self::build_key(kind, key);

        if let Some(value) = self.cache.get::<T>(&cache_key).await.map_err(GatewayError::Cache)? {
            return Ok(value);
        }

        let value = fetch().await.map_err(GatewayError::Fetch)?;
        if let Err(e) = self.cache.set(&cache_key, &value, Some(self.ttl_for(kind))).await {
            warn!("failed to cache {}: {}", cache_key, e);
        }
        Ok(value)
    }

    /// Read-through for resources that may legitimately not exist. Absence
    /// is never cached: the next read asks the authoritative source again.
    pub async fn get_or_fetch_optional<T, F, Fut>(
        &self,
        kind: ResourceKind,
        key: &str,
        fetch: F,
    ) -> Result<Option<T>, GatewayError>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, StorageError>>,
    {
        let cache_key = Self::build_key(kind, key);

        if let Some(value) = self.cache.get::<T>(&cache_key).await.map_err(GatewayError::Cache)? {
            return Ok(Some(value));
        }

        match fetch().await.map_err(GatewayError::Fetch)? {
            Some(value) => {
                if let Err(e) = self.cache.set(&cache_key, &value, Some(self.ttl_for(kind))).await {
                    warn!("failed to cache {}: {}", cache_key, e);
                }
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Unconditional removal; absent keys are a no-op.
    pub async fn invalidate(&self, kind: ResourceKind, key: &str) -> Result<(), GatewayError> {
        self.cache
            .del(&Self::build_key(kind, key))
            .await
            .map_err(GatewayError::Cache)
    }

    /// Post-commit invalidation. The mutation already stands, so a failure
    /// here must not fail the caller: it is retried once and otherwise
    /// logged loudly as a consistency incident.
    pub async fn invalidate_best_effort(&self, kind: ResourceKind, key: &str) {
        if let Err(first) = self.invalidate(kind, key).await {
            error!(
                "cache invalidation failed for {}:{} ({}), retrying",
                kind.prefix(),
                key,
                first
            );
            if let Err(second) = self.invalidate(kind, key).await {
                error!(
                    "cache entry {}:{} may be stale until TTL: {}",
                    kind.prefix(),
                    key,
                    second
                );
            }
        }
    }
}
