//! SQLite lease store
//!
//! Lease records persisted in a SQLite table, one row per lease key. The
//! row version is the fencing token; writes are conditional on it. Several
//! processes on one host may share the database file.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use super::{LeaseStore, StoreResult};
use crate::error::{Error, Result, StoreError};
use crate::record::{FencingToken, LeaseRecord, VersionedRecord};

/// How long SQLite waits on a locked database before reporting busy
const BUSY_TIMEOUT: Duration = Duration::from_millis(250);

/// Table of lease records backed by SQLite
#[derive(Debug)]
pub struct LeaseTable {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl LeaseTable {
    /// Create or open the lease database
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS leases (
                key TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                version INTEGER NOT NULL,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Database file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read one lease
    pub async fn get(&self, key: &str) -> StoreResult<VersionedRecord> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let row: Option<(String, i64)> = conn
                .query_row(
                    "SELECT body, version FROM leases WHERE key = ?1",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            match row {
                Some((body, version)) => decode_row(&key, &body, version),
                None => Err(StoreError::NotFound { key }),
            }
        })
        .await
    }

    /// Conditionally write one lease; see [`LeaseStore::create_or_update`]
    pub async fn compare_and_swap(
        &self,
        key: &str,
        record: &LeaseRecord,
        expected: Option<&FencingToken>,
    ) -> StoreResult<FencingToken> {
        let body = record
            .encode()
            .map_err(|e| StoreError::Unavailable(format!("cannot encode lease record: {}", e)))?;
        let key = key.to_string();
        let expected = expected.map(|token| token.as_str().parse::<i64>());

        self.with_conn(move |conn| match expected {
            None => {
                let inserted = conn.execute(
                    r#"
                    INSERT INTO leases (key, body, version) VALUES (?1, ?2, 1)
                    ON CONFLICT(key) DO NOTHING
                    "#,
                    params![key, body],
                )?;
                if inserted == 0 {
                    return Err(StoreError::Conflict { key });
                }
                Ok(FencingToken::new("1"))
            }
            // Not one of our tokens, so it can never match
            Some(Err(_)) => Err(StoreError::Conflict { key }),
            Some(Ok(version)) => {
                let updated = conn.execute(
                    r#"
                    UPDATE leases SET body = ?2, version = version + 1, updated_at = CURRENT_TIMESTAMP
                    WHERE key = ?1 AND version = ?3
                    "#,
                    params![key, body, version],
                )?;
                if updated == 1 {
                    return Ok(FencingToken::new((version + 1).to_string()));
                }

                let exists: Option<i64> = conn
                    .query_row(
                        "SELECT version FROM leases WHERE key = ?1",
                        params![key],
                        |row| row.get(0),
                    )
                    .optional()?;
                match exists {
                    Some(_) => Err(StoreError::Conflict { key }),
                    None => Err(StoreError::NotFound { key }),
                }
            }
        })
        .await
    }

    /// All leases, ordered by key
    pub async fn list(&self) -> StoreResult<Vec<(String, VersionedRecord)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key, body, version FROM leases ORDER BY key")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?;

            let mut leases = Vec::new();
            for row in rows {
                let (key, body, version) = row?;
                let record = decode_row(&key, &body, version)?;
                leases.push((key, record));
            }
            Ok(leases)
        })
        .await
    }

    /// Run `op` on the connection off the async runtime
    async fn with_conn<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| StoreError::Unavailable("lease database lock poisoned".into()))?;
            op(&conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("lease database task failed: {}", e)))?
    }
}

fn decode_row(key: &str, body: &str, version: i64) -> StoreResult<VersionedRecord> {
    let record = LeaseRecord::decode(body).map_err(|e| {
        StoreError::Unavailable(format!("corrupt lease record {}: {}", key, e))
    })?;
    Ok(VersionedRecord {
        record,
        token: FencingToken::new(version.to_string()),
    })
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Store(StoreError::from(e))
    }
}

/// One lease of a [`LeaseTable`]
#[derive(Debug, Clone)]
pub struct SqliteLeaseStore {
    table: Arc<LeaseTable>,
    key: String,
}

impl SqliteLeaseStore {
    pub fn new(table: Arc<LeaseTable>, key: impl Into<String>) -> Self {
        Self {
            table,
            key: key.into(),
        }
    }

    /// Open the database at `path` and address lease `key`
    pub fn open(path: impl AsRef<Path>, key: impl Into<String>) -> Result<Self> {
        Ok(Self::new(Arc::new(LeaseTable::open(path)?), key))
    }
}

#[async_trait]
impl LeaseStore for SqliteLeaseStore {
    async fn read(&self) -> StoreResult<VersionedRecord> {
        self.table.get(&self.key).await
    }

    async fn create_or_update(
        &self,
        record: &LeaseRecord,
        expected: Option<&FencingToken>,
    ) -> StoreResult<FencingToken> {
        self.table.compare_and_swap(&self.key, record, expected).await
    }

    fn describe(&self) -> String {
        format!("sqlite://{}#{}", self.table.path().display(), self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    fn record(holder: &str, transitions: u64) -> LeaseRecord {
        let now = Utc::now();
        LeaseRecord {
            holder_identity: holder.to_string(),
            lease_duration_seconds: 15,
            acquire_time: now,
            renew_time: now,
            transitions,
        }
    }

    #[tokio::test]
    async fn test_create_read_update() {
        let dir = tempdir().unwrap();
        let store = SqliteLeaseStore::open(dir.path().join("leases.db"), "default/test").unwrap();

        assert!(matches!(store.read().await, Err(StoreError::NotFound { .. })));

        let token = store.create_or_update(&record("node-a", 1), None).await.unwrap();
        let read = store.read().await.unwrap();
        assert_eq!(read.token, token);
        assert_eq!(read.record.holder_identity, "node-a");

        let next = store
            .create_or_update(&record("node-a", 1), Some(&token))
            .await
            .unwrap();
        assert_ne!(next, token);
    }

    #[tokio::test]
    async fn test_fencing() {
        let dir = tempdir().unwrap();
        let store = SqliteLeaseStore::open(dir.path().join("leases.db"), "default/test").unwrap();

        let stale = store.create_or_update(&record("node-a", 1), None).await.unwrap();
        assert!(matches!(
            store.create_or_update(&record("node-b", 1), None).await,
            Err(StoreError::Conflict { .. })
        ));
        store
            .create_or_update(&record("node-a", 1), Some(&stale))
            .await
            .unwrap();

        assert!(matches!(
            store.create_or_update(&record("node-b", 2), Some(&stale)).await,
            Err(StoreError::Conflict { .. })
        ));
        assert!(matches!(
            store
                .create_or_update(&record("node-b", 2), Some(&FencingToken::new("etag-xyz")))
                .await,
            Err(StoreError::Conflict { .. })
        ));
        assert_eq!(store.read().await.unwrap().record.holder_identity, "node-a");
    }

    #[tokio::test]
    async fn test_update_missing_record_is_not_found() {
        let dir = tempdir().unwrap();
        let store = SqliteLeaseStore::open(dir.path().join("leases.db"), "default/test").unwrap();
        assert!(matches!(
            store
                .create_or_update(&record("node-a", 1), Some(&FencingToken::new("4")))
                .await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_two_connections_share_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("leases.db");
        let a = SqliteLeaseStore::open(&path, "default/test").unwrap();
        let b = SqliteLeaseStore::open(&path, "default/test").unwrap();

        a.create_or_update(&record("node-a", 1), None).await.unwrap();
        assert!(matches!(
            b.create_or_update(&record("node-b", 1), None).await,
            Err(StoreError::Conflict { .. })
        ));
        assert_eq!(b.read().await.unwrap().record.holder_identity, "node-a");
    }

    #[tokio::test]
    async fn test_list_orders_by_key() {
        let dir = tempdir().unwrap();
        let table = Arc::new(LeaseTable::open(dir.path().join("leases.db")).unwrap());
        SqliteLeaseStore::new(Arc::clone(&table), "ns/b")
            .create_or_update(&record("x", 1), None)
            .await
            .unwrap();
        SqliteLeaseStore::new(Arc::clone(&table), "ns/a")
            .create_or_update(&record("y", 1), None)
            .await
            .unwrap();

        let keys: Vec<String> = table.list().await.unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["ns/a".to_string(), "ns/b".to_string()]);
    }
}
