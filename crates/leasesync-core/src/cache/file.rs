// # File Cache Store
//
// File-based implementation of CacheStore with crash recovery.
//
// ## Crash Recovery
//
// - Atomic writes: write-then-rename on every commit
// - Automatic backup: keeps a .backup of the last committed file
// - Recovery: falls back to the backup if the main file is corrupted
// - A corrupted file without a usable backup fails to open; an empty cache
//   would classify every binding as new and never delete stale records
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "records": [
//     {
//       "key": { "domain": "example.com", "hostname": "host1" },
//       "address": "10.0.0.1",
//       "applied_at": "2025-01-09T12:00:00Z"
//     }
//   ]
// }
// ```

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::Error;
use crate::binding::BindingKey;
use crate::traits::cache_store::{CacheRecord, CacheStore, CacheStoreFactory};

/// Cache file format version
const CACHE_FILE_VERSION: &str = "1.0";

/// JSON file cache store
///
/// Writes stay in memory until [`commit`](CacheStore::commit), which
/// replaces the file atomically. A cycle that never reaches commit leaves
/// the file exactly as the last successful cycle wrote it.
#[derive(Debug)]
pub struct FileCacheStore {
    path: PathBuf,
    state: Arc<RwLock<FileState>>,
}

#[derive(Debug)]
struct FileState {
    records: BTreeMap<BindingKey, CacheRecord>,
    dirty: bool,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct CacheFileFormat {
    version: String,
    records: Vec<CacheRecord>,
}

impl FileCacheStore {
    /// Open or create a file cache store
    ///
    /// This will:
    /// 1. Create parent directories if needed
    /// 2. Load the existing cache file, if any
    /// 3. Fall back to the backup when the file is corrupted
    /// 4. Fail with `Error::CacheStore` when both are unusable
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::cache_store(format!(
                    "Failed to create cache directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let records = Self::load_with_recovery(&path).await?;

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(FileState {
                records,
                dirty: false,
            })),
        })
    }

    async fn load_with_recovery(path: &Path) -> Result<BTreeMap<BindingKey, CacheRecord>, Error> {
        match Self::load(path).await {
            Ok(records) => {
                tracing::debug!("Loaded lease cache: {} records", records.len());
                Ok(records)
            }
            Err(Error::Json(e)) => {
                tracing::warn!(
                    "Lease cache {} appears corrupted: {}. Attempting recovery from backup.",
                    path.display(),
                    e
                );

                let backup_path = Self::backup_path(path);
                if !backup_path.exists() {
                    return Err(Error::cache_store(format!(
                        "Lease cache {} is corrupted and no backup exists: {}",
                        path.display(),
                        e
                    )));
                }

                match Self::load(&backup_path).await {
                    Ok(records) => {
                        tracing::info!("Recovered lease cache from backup: {} records", records.len());
                        if let Err(restore_err) = fs::copy(&backup_path, path).await {
                            tracing::error!(
                                "Failed to restore cache file from backup: {}",
                                restore_err
                            );
                        }
                        Ok(records)
                    }
                    Err(backup_err) => Err(Error::cache_store(format!(
                        "Lease cache {} is corrupted and its backup is unusable: {}",
                        path.display(),
                        backup_err
                    ))),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn load(path: &Path) -> Result<BTreeMap<BindingKey, CacheRecord>, Error> {
        if !path.exists() {
            tracing::debug!("Cache file does not exist yet: {}", path.display());
            return Ok(BTreeMap::new());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::cache_store(format!("Failed to read cache file {}: {}", path.display(), e))
        })?;

        let file: CacheFileFormat = serde_json::from_str(&content)?;

        if file.version != CACHE_FILE_VERSION {
            tracing::warn!(
                "Cache file version mismatch: expected {}, got {}. Attempting to load anyway.",
                CACHE_FILE_VERSION,
                file.version
            );
        }

        let mut records = BTreeMap::new();
        for record in file.records {
            if let Some(previous) = records.insert(record.key.clone(), record) {
                tracing::warn!("Duplicate cache entry for {}, keeping the later one", previous.key);
            }
        }
        Ok(records)
    }

    async fn write(&self) -> Result<(), Error> {
        let mut state_guard = self.state.write().await;

        let file = CacheFileFormat {
            version: CACHE_FILE_VERSION.to_string(),
            records: state_guard.records.values().cloned().collect(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| Error::cache_store(format!("Failed to serialize lease cache: {}", e)))?;

        let temp_path = self.temp_path();
        {
            let mut handle = fs::File::create(&temp_path).await.map_err(|e| {
                Error::cache_store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            handle.write_all(json.as_bytes()).await.map_err(|e| {
                Error::cache_store(format!(
                    "Failed to write temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            handle.sync_all().await.map_err(|e| {
                Error::cache_store(format!(
                    "Failed to sync temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create cache backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::cache_store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        state_guard.dirty = false;
        tracing::trace!("Lease cache written to {}", self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl CacheStore for FileCacheStore {
    async fn get(&self, key: &BindingKey) -> Result<Option<CacheRecord>, Error> {
        let state_guard = self.state.read().await;
        Ok(state_guard.records.get(key).cloned())
    }

    async fn list_all(&self) -> Result<Vec<CacheRecord>, Error> {
        let state_guard = self.state.read().await;
        Ok(state_guard.records.values().cloned().collect())
    }

    async fn delete(&self, key: &BindingKey) -> Result<(), Error> {
        let mut state_guard = self.state.write().await;
        if state_guard.records.remove(key).is_some() {
            state_guard.dirty = true;
        }
        Ok(())
    }

    async fn upsert(&self, key: &BindingKey, address: Ipv4Addr) -> Result<(), Error> {
        let mut state_guard = self.state.write().await;
        state_guard
            .records
            .insert(key.clone(), CacheRecord::new(key.clone(), address));
        state_guard.dirty = true;
        Ok(())
    }

    async fn commit(&self) -> Result<(), Error> {
        let dirty = self.state.read().await.dirty;
        if dirty || !self.path.exists() {
            self.write().await
        } else {
            Ok(())
        }
    }
}

/// Opens a [`FileCacheStore`] at a fixed path for every cycle
#[derive(Debug, Clone)]
pub struct FileCacheStoreFactory {
    path: PathBuf,
}

impl FileCacheStoreFactory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CacheStoreFactory for FileCacheStoreFactory {
    async fn open(&self) -> Result<Box<dyn CacheStore>, Error> {
        Ok(Box::new(FileCacheStore::open(&self.path).await?))
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}
