mod api;
mod error;
mod memory;
mod redis;

pub use api::ApiStore;
pub use error::StorageError;
pub use memory::{MemoryCache, MemoryStore};
pub use redis::RedisClient;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::model::drug::DrugRecord;
use crate::model::user::UserAccount;

/// Volatile, TTL-expiring key/value store. Never the source of truth.
#[async_trait]
pub trait Cache: Send + Sync + 'static {
    async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError>;
    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError>;
    async fn del(&self, key: &str) -> Result<(), StorageError>;
}

/// Authoritative user store. `update_user` is a conditional write keyed on
/// `account.version`: it commits (and bumps the stored version) only when
/// the stored version still matches, returning false on conflict. All
/// ledger atomicity rests on this contract.
#[async_trait]
pub trait UserStore: Send + Sync + 'static {
    async fn get_user(&self, id: Uuid) -> Result<Option<UserAccount>, StorageError>;
    async fn find_by_telegram(&self, telegram_user_id: u64) -> Result<Option<UserAccount>, StorageError>;
    /// Idempotent first-contact upsert: creates `account` unless one already
    /// exists for its telegram id, and returns the surviving record.
    async fn upsert_by_telegram(&self, account: UserAccount) -> Result<UserAccount, StorageError>;
    async fn update_user(&self, account: &UserAccount) -> Result<bool, StorageError>;
}

#[async_trait]
pub trait DrugStore: Send + Sync + 'static {
    async fn get_drug(&self, name_key: &str) -> Result<Option<DrugRecord>, StorageError>;
    async fn upsert_drug(&self, record: &DrugRecord) -> Result<(), StorageError>;
}

/// Concrete cache backend handed to the gateway: Redis in production, the
/// in-process map in tests and single-node setups.
#[derive(Clone)]
pub enum CacheBackend {
    Memory(MemoryCache),
    Redis(RedisClient),
}

impl CacheBackend {
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self {
            CacheBackend::Memory(memory) => memory.get(key).await,
            CacheBackend::Redis(redis) => redis.get(key).await,
        }
    }

    pub async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        match self {
            CacheBackend::Memory(memory) => memory.set(key, value, ttl).await,
            CacheBackend::Redis(redis) => redis.set(key, value, ttl).await,
        }
    }

    pub async fn del(&self, key: &str) -> Result<(), StorageError> {
        match self {
            CacheBackend::Memory(memory) => memory.del(key).await,
            CacheBackend::Redis(redis) => redis.del(key).await,
        }
    }
}
