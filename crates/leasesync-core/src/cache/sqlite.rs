// # SQLite Cache Store
//
// SQLite implementation of CacheStore.
//
// ## Schema
//
// ```sql
// CREATE TABLE leases (
//     domain     TEXT NOT NULL,
//     hostname   TEXT NOT NULL,
//     ip         TEXT NOT NULL,
//     applied_at TEXT,
//     PRIMARY KEY (domain, hostname)
// );
// ```
//
// The primary key is the uniqueness guarantee of the cache. Databases
// created before `applied_at` existed are migrated in place on open.
//
// ## Transactions
//
// The first write of a handle begins a transaction; `commit()` commits it.
// Dropping the handle without committing rolls every write back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Transaction;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::Error;
use crate::binding::BindingKey;
use crate::traits::cache_store::{CacheRecord, CacheStore, CacheStoreFactory};

/// Default cache database path
pub const DEFAULT_SQLITE_CACHE_PATH: &str = "./static_leases.db";

type LeaseRow = (String, String, String, Option<String>);

const SELECT_ONE: &str =
    "SELECT domain, hostname, ip, applied_at FROM leases WHERE domain = ? AND hostname = ?";
const SELECT_ALL: &str =
    "SELECT domain, hostname, ip, applied_at FROM leases ORDER BY domain, hostname";

/// SQLite-backed cache store
pub struct SqliteCacheStore {
    path: PathBuf,
    pool: SqlitePool,
    tx: Mutex<Option<Transaction<'static, Sqlite>>>,
}

impl std::fmt::Debug for SqliteCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCacheStore")
            .field("path", &self.path)
            .finish()
    }
}

impl SqliteCacheStore {
    /// Open the database, creating the file and schema if needed
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| {
                Error::cache_store(format!(
                    "Failed to create/open the lease cache database '{}': {}",
                    path.display(),
                    e
                ))
            })?;

        Self::init_schema(&pool).await.map_err(|e| {
            Error::cache_store(format!(
                "Failed to initialize the lease cache schema in '{}': {}",
                path.display(),
                e
            ))
        })?;

        debug!("Opened lease cache database {}", path.display());

        Ok(Self {
            path,
            pool,
            tx: Mutex::new(None),
        })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS leases (
                domain TEXT NOT NULL,
                hostname TEXT NOT NULL,
                ip TEXT NOT NULL,
                applied_at TEXT,
                PRIMARY KEY (domain, hostname)
            )",
        )
        .execute(pool)
        .await?;

        let columns: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM pragma_table_info('leases')")
                .fetch_all(pool)
                .await?;

        if !columns.iter().any(|(name,)| name == "applied_at") {
            info!("Migrating lease cache: adding applied_at column");
            sqlx::query("ALTER TABLE leases ADD COLUMN applied_at TEXT")
                .execute(pool)
                .await?;
        }

        Ok(())
    }

    fn row_to_record(row: LeaseRow) -> Result<CacheRecord, Error> {
        let (domain, hostname, ip, applied_at) = row;

        let address: Ipv4Addr = ip.parse().map_err(|_| {
            Error::cache_store(format!(
                "Cached address '{}' of {}.{} is not an IPv4 address",
                ip, hostname, domain
            ))
        })?;

        let applied_at = applied_at
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_default();

        Ok(CacheRecord {
            key: BindingKey::new(domain, hostname),
            address,
            applied_at,
        })
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn get(&self, key: &BindingKey) -> Result<Option<CacheRecord>, Error> {
        let query = sqlx::query_as::<_, LeaseRow>(SELECT_ONE)
            .bind(&key.domain)
            .bind(&key.hostname);

        let mut guard = self.tx.lock().await;
        let row = match guard.as_mut() {
            Some(tx) => query.fetch_optional(&mut **tx).await?,
            None => query.fetch_optional(&self.pool).await?,
        };

        row.map(Self::row_to_record).transpose()
    }

    async fn list_all(&self) -> Result<Vec<CacheRecord>, Error> {
        let query = sqlx::query_as::<_, LeaseRow>(SELECT_ALL);

        let mut guard = self.tx.lock().await;
        let rows = match guard.as_mut() {
            Some(tx) => query.fetch_all(&mut **tx).await?,
            None => query.fetch_all(&self.pool).await?,
        };

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn delete(&self, key: &BindingKey) -> Result<(), Error> {
        let mut guard = self.tx.lock().await;
        let mut tx = match guard.take() {
            Some(tx) => tx,
            None => self.pool.begin().await?,
        };

        sqlx::query("DELETE FROM leases WHERE domain = ? AND hostname = ?")
            .bind(&key.domain)
            .bind(&key.hostname)
            .execute(&mut *tx)
            .await?;

        *guard = Some(tx);
        Ok(())
    }

    async fn upsert(&self, key: &BindingKey, address: Ipv4Addr) -> Result<(), Error> {
        let mut guard = self.tx.lock().await;
        let mut tx = match guard.take() {
            Some(tx) => tx,
            None => self.pool.begin().await?,
        };

        sqlx::query("INSERT OR REPLACE INTO leases (domain, hostname, ip, applied_at) VALUES (?, ?, ?, ?)")
            .bind(&key.domain)
            .bind(&key.hostname)
            .bind(address.to_string())
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;

        *guard = Some(tx);
        Ok(())
    }

    async fn commit(&self) -> Result<(), Error> {
        let pending = self.tx.lock().await.take();
        if let Some(tx) = pending {
            tx.commit().await?;
            debug!("Lease cache committed to {}", self.path.display());
        }
        Ok(())
    }
}

/// Opens a [`SqliteCacheStore`] at a fixed path for every cycle
#[derive(Debug, Clone)]
pub struct SqliteCacheStoreFactory {
    path: PathBuf,
}

impl SqliteCacheStoreFactory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for SqliteCacheStoreFactory {
    fn default() -> Self {
        Self::new(DEFAULT_SQLITE_CACHE_PATH)
    }
}

#[async_trait]
impl CacheStoreFactory for SqliteCacheStoreFactory {
    async fn open(&self) -> Result<Box<dyn CacheStore>, Error> {
        Ok(Box::new(SqliteCacheStore::open(&self.path).await?))
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}
