// # Memory Cache Store
//
// In-memory implementation of CacheStore.
//
// ## Purpose
//
// Fast, non-persistent cache. Every process start behaves like a first run:
// all bindings are classified as new and sent add-only. Records of hosts
// removed or readdressed while the process was down stay in DNS until a
// forced run clears them.
//
// ## When to Use
//
// - Testing environments
// - Dry runs and one-off resyncs

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::binding::BindingKey;
use crate::traits::cache_store::{CacheRecord, CacheStore, CacheStoreFactory};

/// In-memory cache store
///
/// Clones share the same records, so a factory can hand out handles to one
/// cache across cycles.
///
/// # Example
///
/// ```rust,no_run
/// use leasesync_core::cache::MemoryCacheStore;
/// use leasesync_core::{BindingKey, CacheStore};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryCacheStore::new();
///     let key = BindingKey::new("example.com", "host1");
///
///     store.upsert(&key, "10.0.0.1".parse()?).await?;
///     store.commit().await?;
///
///     let record = store.get(&key).await?;
///     assert_eq!(record.map(|r| r.address), Some("10.0.0.1".parse()?));
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheStore {
    inner: Arc<RwLock<BTreeMap<BindingKey, CacheRecord>>>,
}

impl MemoryCacheStore {
    /// Create a new empty memory cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a memory cache pre-populated with records
    pub fn with_records(records: impl IntoIterator<Item = CacheRecord>) -> Self {
        let map = records
            .into_iter()
            .map(|record| (record.key.clone(), record))
            .collect();
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    /// Get the number of records in the store
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Snapshot of every key and address
    pub async fn snapshot(&self) -> BTreeMap<BindingKey, Ipv4Addr> {
        self.inner
            .read()
            .await
            .iter()
            .map(|(key, record)| (key.clone(), record.address))
            .collect()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &BindingKey) -> Result<Option<CacheRecord>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.get(key).cloned())
    }

    async fn list_all(&self) -> Result<Vec<CacheRecord>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.values().cloned().collect())
    }

    async fn delete(&self, key: &BindingKey) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.remove(key);
        Ok(())
    }

    async fn upsert(&self, key: &BindingKey, address: Ipv4Addr) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.insert(key.clone(), CacheRecord::new(key.clone(), address));
        Ok(())
    }

    async fn commit(&self) -> Result<(), Error> {
        // Writes are applied immediately
        Ok(())
    }
}

/// Hands out handles to one shared [`MemoryCacheStore`]
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheStoreFactory {
    store: MemoryCacheStore,
}

impl MemoryCacheStoreFactory {
    pub fn new(store: MemoryCacheStore) -> Self {
        Self { store }
    }

    /// The shared store (for inspection)
    pub fn store(&self) -> &MemoryCacheStore {
        &self.store
    }
}

#[async_trait]
impl CacheStoreFactory for MemoryCacheStoreFactory {
    async fn open(&self) -> Result<Box<dyn CacheStore>, Error> {
        Ok(Box::new(self.store.clone()))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
