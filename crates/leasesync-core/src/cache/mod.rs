//! Lease cache implementations
//!
//! This module provides implementations of the CacheStore trait:
//! - MemoryCacheStore: In-memory storage (for testing)
//! - FileCacheStore: JSON file with crash recovery
//! - SqliteCacheStore: SQLite table, the default for the daemon

mod file;
mod memory;
mod sqlite;

pub use file::{FileCacheStore, FileCacheStoreFactory};
pub use memory::{MemoryCacheStore, MemoryCacheStoreFactory};
pub use sqlite::{DEFAULT_SQLITE_CACHE_PATH, SqliteCacheStore, SqliteCacheStoreFactory};

use crate::config::CacheConfig;
use crate::traits::CacheStoreFactory;

/// Build the cache factory a configuration asks for
pub fn factory_for(config: &CacheConfig) -> Box<dyn CacheStoreFactory> {
    match config {
        CacheConfig::Sqlite { path } => Box::new(SqliteCacheStoreFactory::new(path)),
        CacheConfig::File { path } => Box::new(FileCacheStoreFactory::new(path)),
        CacheConfig::Memory => Box::new(MemoryCacheStoreFactory::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_factory_for_backend() {
        let sqlite = factory_for(&CacheConfig::default());
        assert_eq!(sqlite.backend_name(), "sqlite");

        let file = factory_for(&CacheConfig::File {
            path: PathBuf::from("leases.json"),
        });
        assert_eq!(file.backend_name(), "file");

        assert_eq!(factory_for(&CacheConfig::Memory).backend_name(), "memory");
    }
}
