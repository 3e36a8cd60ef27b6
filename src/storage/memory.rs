/// In-memory storage backend
use crate::storage::{Backend, StorageError, StorageResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

type Records = BTreeMap<(String, Vec<u8>), Vec<u8>>;

/// Backend keeping all records in a process-local map
///
/// Used by tests and for throwaway instances. Contents are lost on drop;
/// `close` keeps them so a closed and reopened backend behaves like a
/// persistent engine.
#[derive(Default)]
pub struct MemoryBackend {
    records: RwLock<Records>,
    open: RwLock<bool>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if *self.open.read() {
            Ok(())
        } else {
            Err(StorageError::Closed)
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn open(&self) -> StorageResult<()> {
        *self.open.write() = true;
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        *self.open.write() = false;
        Ok(())
    }

    async fn get(&self, namespace: &str, key: &[u8]) -> StorageResult<Vec<u8>> {
        self.ensure_open()?;
        self.records
            .read()
            .get(&(namespace.to_string(), key.to_vec()))
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn put(&self, namespace: &str, key: &[u8], value: Vec<u8>) -> StorageResult<()> {
        self.ensure_open()?;
        self.records
            .write()
            .insert((namespace.to_string(), key.to_vec()), value);
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &[u8]) -> StorageResult<()> {
        self.ensure_open()?;
        self.records
            .write()
            .remove(&(namespace.to_string(), key.to_vec()));
        Ok(())
    }

    async fn list(&self, namespace: &str) -> StorageResult<Vec<Vec<u8>>> {
        self.ensure_open()?;
        Ok(self
            .records
            .read()
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, key)| key.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_requires_open() {
        let backend = MemoryBackend::new();
        assert!(matches!(
            backend.get("ns", b"k").await,
            Err(StorageError::Closed)
        ));

        backend.open().await.unwrap();
        backend.open().await.unwrap();
        backend.put("ns", b"k", b"v".to_vec()).await.unwrap();

        backend.close().await.unwrap();
        assert!(backend.list("ns").await.is_err());

        backend.open().await.unwrap();
        assert_eq!(backend.get("ns", b"k").await.unwrap(), b"v");
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let backend = MemoryBackend::new();
        backend.open().await.unwrap();
        backend.delete("ns", b"missing").await.unwrap();
        assert!(matches!(
            backend.get("ns", b"missing").await,
            Err(StorageError::NotFound)
        ));
    }
}
