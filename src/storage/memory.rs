use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::model::drug::DrugRecord;
use crate::model::user::UserAccount;

use super::{Cache, DrugStore, StorageError, UserStore};

#[derive(Clone, Debug)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// In-process cache over a DashMap. Expiry is lazy: an entry past its TTL
/// is dropped on the read that observes it, so it behaves as a miss and
/// never as stale data.
#[derive(Clone)]
pub struct MemoryCache {
    entries: Arc<DashMap<String, MemoryEntry>>,
}

impl MemoryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(DashMap::with_capacity(capacity)),
        }
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                drop(entry);
                self.entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(serde_json::from_str(&entry.value)?)),
            None => Ok(None),
        }
    }

    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let entry = MemoryEntry {
            value: serde_json::to_string(value)?,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// In-process authoritative store. The conditional user update holds the
/// DashMap entry guard for the whole compare-and-write, which is what makes
/// concurrent ledger mutations safe without an external database.
#[derive(Clone, Default)]
pub struct MemoryStore {
    users: Arc<DashMap<Uuid, UserAccount>>,
    telegram_index: Arc<DashMap<u64, Uuid>>,
    drugs: Arc<DashMap<String, DrugRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_user(&self, id: Uuid) -> Result<Option<UserAccount>, StorageError> {
        Ok(self.users.get(&id).map(|user| user.clone()))
    }

    async fn find_by_telegram(&self, telegram_user_id: u64) -> Result<Option<UserAccount>, StorageError> {
        let id = match self.telegram_index.get(&telegram_user_id) {
            Some(id) => *id,
            None => return Ok(None),
        };
        Ok(self.users.get(&id).map(|user| user.clone()))
    }

    async fn upsert_by_telegram(&self, account: UserAccount) -> Result<UserAccount, StorageError> {
        match self.telegram_index.entry(account.telegram_user_id) {
            Entry::Occupied(existing) => {
                let id = *existing.get();
                self.users
                    .get(&id)
                    .map(|user| user.clone())
                    .ok_or_else(|| StorageError::Other(format!("dangling telegram index for user {}", id)))
            }
            Entry::Vacant(slot) => {
                slot.insert(account.id);
                self.users.insert(account.id, account.clone());
                Ok(account)
            }
        }
    }

    async fn update_user(&self, account: &UserAccount) -> Result<bool, StorageError> {
        match self.users.get_mut(&account.id) {
            Some(mut stored) => {
                if stored.version != account.version {
                    return Ok(false);
                }
                let mut committed = account.clone();
                committed.version = account.version + 1;
                *stored = committed;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl DrugStore for MemoryStore {
    async fn get_drug(&self, name_key: &str) -> Result<Option<DrugRecord>, StorageError> {
        Ok(self.drugs.get(name_key).map(|record| record.clone()))
    }

    async fn upsert_drug(&self, record: &DrugRecord) -> Result<(), StorageError> {
        self.drugs.insert(record.name_key.clone(), record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn expired_entry_reads_as_miss() {
        let cache = MemoryCache::new(8);
        cache
            .set("k", &"v".to_string(), Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert_eq!(cache.get::<String>("k").await.unwrap(), Some("v".to_string()));

        sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get::<String>("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn del_is_a_noop_for_absent_keys() {
        let cache = MemoryCache::new(8);
        cache.del("missing").await.unwrap();
    }

    #[tokio::test]
    async fn upsert_by_telegram_is_idempotent() {
        let store = MemoryStore::new();
        let first = store.upsert_by_telegram(UserAccount::new(42, 10)).await.unwrap();
        let second = store.upsert_by_telegram(UserAccount::new(42, 10)).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.find_by_telegram(42).await.unwrap().unwrap().id, first.id);
    }

    #[tokio::test]
    async fn conditional_update_rejects_stale_version() {
        let store = MemoryStore::new();
        let user = store.upsert_by_telegram(UserAccount::new(1, 10)).await.unwrap();

        let mut fresh = user.clone();
        fresh.allowed_tokens = 5;
        assert!(store.update_user(&fresh).await.unwrap());

        // Same version again: the first commit bumped it.
        let mut stale = user.clone();
        stale.allowed_tokens = 9;
        assert!(!store.update_user(&stale).await.unwrap());

        let stored = store.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(stored.allowed_tokens, 5);
        assert_eq!(stored.version, 1);
    }
}
