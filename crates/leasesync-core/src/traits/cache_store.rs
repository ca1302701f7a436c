// # Cache Store Trait
//
// Defines the interface for the lease cache: the persisted projection of
// the last successfully applied binding set.
//
// ## Purpose
//
// The cache is the system's only memory. The reconciler diffs the current
// bindings against it, and the engine writes it back only after the DNS
// server accepted the whole transaction. A cycle that fails before that
// point leaves the cache untouched, so the next cycle recomputes the same
// diff.
//
// ## Implementations
//
// - `MemoryCacheStore`: tests, no persistence
// - `FileCacheStore`: JSON file with atomic writes and backup recovery
// - `SqliteCacheStore`: SQLite table keyed by `(domain, hostname)`
//
// ## Usage
//
// ```rust,ignore
// use leasesync_core::{BindingKey, CacheStore};
//
// let cache = factory.open().await?;
// let key = BindingKey::new("example.com", "host1");
// cache.upsert(&key, "10.0.0.1".parse()?).await?;
// cache.commit().await?;
// ```

use async_trait::async_trait;
use std::net::Ipv4Addr;

use crate::binding::{Binding, BindingKey};

/// Cached projection of an applied binding
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CacheRecord {
    pub key: BindingKey,
    /// Address last pushed to DNS
    pub address: Ipv4Addr,
    /// When the apply that produced this record committed
    pub applied_at: chrono::DateTime<chrono::Utc>,
}

impl CacheRecord {
    pub fn new(key: BindingKey, address: Ipv4Addr) -> Self {
        Self {
            key,
            address,
            applied_at: chrono::Utc::now(),
        }
    }

    pub fn to_binding(&self) -> Binding {
        Binding {
            key: self.key.clone(),
            address: self.address,
        }
    }
}

/// Trait for lease cache implementations
///
/// Writes (`delete`, `upsert`) may be buffered; they are only guaranteed
/// durable after `commit()` returns. The engine calls `commit()` exactly
/// once per cycle that reaches the persisting phase.
///
/// Reads (`get`, `list_all`) see the committed state plus any writes the
/// same handle has made since.
///
/// # Uniqueness
///
/// A store never yields two records with the same key.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get the cached record for a key
    ///
    /// # Returns
    ///
    /// - `Ok(Some(CacheRecord))`: The cached record
    /// - `Ok(None)`: The key was never applied (or was deleted)
    /// - `Err(Error)`: Storage error
    async fn get(&self, key: &BindingKey) -> Result<Option<CacheRecord>, crate::Error>;

    /// List every cached record
    async fn list_all(&self) -> Result<Vec<CacheRecord>, crate::Error>;

    /// Remove a key (no-op if absent)
    async fn delete(&self, key: &BindingKey) -> Result<(), crate::Error>;

    /// Insert or replace the address for a key
    async fn upsert(&self, key: &BindingKey, address: Ipv4Addr) -> Result<(), crate::Error>;

    /// Make all pending writes durable
    async fn commit(&self) -> Result<(), crate::Error>;
}

/// Opens a cache handle for one cycle
///
/// The engine opens the cache at the start of every reconcile phase and
/// drops the handle when the cycle ends, so a store that is temporarily
/// unavailable only fails the cycle that hit it.
#[async_trait]
pub trait CacheStoreFactory: Send + Sync {
    /// Open (creating the backing schema if needed) a cache handle
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn CacheStore>)`: A ready handle
    /// - `Err(Error::CacheStore)`: The store could not be opened or initialized
    async fn open(&self) -> Result<Box<dyn CacheStore>, crate::Error>;

    /// Backend name, for logs
    fn backend_name(&self) -> &'static str;
}
