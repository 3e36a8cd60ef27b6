/// SQLite storage backend
///
/// Stores every namespace in a single `records` table keyed by
/// `(namespace, key)`.
use crate::storage::{Backend, StorageError, StorageResult};
use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions},
    Row,
};
use std::{path::PathBuf, time::Duration};
use tokio::sync::RwLock;

/// Database connection options
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub max_connections: u32,
    pub enable_wal: bool,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            enable_wal: true,
        }
    }
}

pub struct SqliteBackend {
    path: PathBuf,
    options: DatabaseOptions,
    pool: RwLock<Option<SqlitePool>>,
}

impl SqliteBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_options(path, DatabaseOptions::default())
    }

    pub fn with_options(path: impl Into<PathBuf>, options: DatabaseOptions) -> Self {
        Self {
            path: path.into(),
            options,
            pool: RwLock::new(None),
        }
    }

    async fn pool(&self) -> StorageResult<SqlitePool> {
        self.pool.read().await.clone().ok_or(StorageError::Closed)
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    async fn open(&self) -> StorageResult<()> {
        let mut guard = self.pool.write().await;
        if guard.is_some() {
            return Ok(());
        }

        // Ensure parent directory exists
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(self.options.max_connections)
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(&self.path)
                    .create_if_missing(true)
                    .journal_mode(if self.options.enable_wal {
                        SqliteJournalMode::Wal
                    } else {
                        SqliteJournalMode::Delete
                    })
                    .busy_timeout(Duration::from_secs(5)),
            )
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                namespace TEXT NOT NULL,
                key BLOB NOT NULL,
                value BLOB NOT NULL,
                PRIMARY KEY (namespace, key)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        tracing::info!(path = %self.path.display(), "Opened sqlite storage");
        *guard = Some(pool);
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
            tracing::info!(path = %self.path.display(), "Closed sqlite storage");
        }
        Ok(())
    }

    async fn get(&self, namespace: &str, key: &[u8]) -> StorageResult<Vec<u8>> {
        let pool = self.pool().await?;
        let row = sqlx::query("SELECT value FROM records WHERE namespace = ?1 AND key = ?2")
            .bind(namespace)
            .bind(key)
            .fetch_optional(&pool)
            .await?
            .ok_or(StorageError::NotFound)?;

        Ok(row.try_get("value")?)
    }

    async fn put(&self, namespace: &str, key: &[u8], value: Vec<u8>) -> StorageResult<()> {
        let pool = self.pool().await?;
        sqlx::query(
            "INSERT INTO records (namespace, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(namespace, key) DO UPDATE SET value = excluded.value",
        )
        .bind(namespace)
        .bind(key)
        .bind(value)
        .execute(&pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &[u8]) -> StorageResult<()> {
        let pool = self.pool().await?;
        sqlx::query("DELETE FROM records WHERE namespace = ?1 AND key = ?2")
            .bind(namespace)
            .bind(key)
            .execute(&pool)
            .await?;

        Ok(())
    }

    async fn list(&self, namespace: &str) -> StorageResult<Vec<Vec<u8>>> {
        let pool = self.pool().await?;
        let rows = sqlx::query("SELECT key FROM records WHERE namespace = ?1 ORDER BY key")
            .bind(namespace)
            .fetch_all(&pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get::<Vec<u8>, _>("key").map_err(StorageError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sqlite_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SqliteBackend::new(dir.path().join("nested").join("db.sqlite"));

        assert!(matches!(
            backend.get("ns", b"k").await,
            Err(StorageError::Closed)
        ));

        backend.open().await.unwrap();
        backend.open().await.unwrap();

        backend.put("ns", b"k", b"one".to_vec()).await.unwrap();
        backend.put("ns", b"k", b"two".to_vec()).await.unwrap();
        backend.put("other", b"k", b"three".to_vec()).await.unwrap();

        assert_eq!(backend.get("ns", b"k").await.unwrap(), b"two");
        assert_eq!(backend.list("ns").await.unwrap(), vec![b"k".to_vec()]);

        backend.delete("ns", b"k").await.unwrap();
        assert!(matches!(
            backend.get("ns", b"k").await,
            Err(StorageError::NotFound)
        ));
        assert_eq!(backend.get("other", b"k").await.unwrap(), b"three");

        backend.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_sqlite_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.sqlite");

        let backend = SqliteBackend::new(&path);
        backend.open().await.unwrap();
        backend.put("ns", b"k", vec![0, 1, 2, 255]).await.unwrap();
        backend.close().await.unwrap();

        let reopened = SqliteBackend::new(&path);
        reopened.open().await.unwrap();
        assert_eq!(reopened.get("ns", b"k").await.unwrap(), vec![0, 1, 2, 255]);
        reopened.close().await.unwrap();
    }
}
