/// Storage abstraction
///
/// Typed persistence on top of an opaque key/value engine. Every persisted
/// type implements [`Storable`] and is registered under an [`EntityKind`],
/// whose namespace becomes part of the physical key so different types can
/// share one engine without colliding.

mod memory;
mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Storage layer errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// No record stored under the requested key
    #[error("Record not found")]
    NotFound,

    /// Operation attempted before `open` or after `close`
    #[error("Storage is not open")]
    Closed,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be encoded or decoded
    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Backing key/value engine
///
/// Single operations are safe to call concurrently. There is no multi-key
/// transaction support.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Acquire the engine. Calling `open` on an open backend is a no-op.
    async fn open(&self) -> StorageResult<()>;

    /// Release the engine
    async fn close(&self) -> StorageResult<()>;

    /// Fetch a record, failing with `StorageError::NotFound` if absent
    async fn get(&self, namespace: &str, key: &[u8]) -> StorageResult<Vec<u8>>;

    /// Write a record, overwriting any previous value
    async fn put(&self, namespace: &str, key: &[u8], value: Vec<u8>) -> StorageResult<()>;

    /// Remove a record. Removing an absent record is not an error.
    async fn delete(&self, namespace: &str, key: &[u8]) -> StorageResult<()>;

    /// All keys stored under a namespace
    async fn list(&self, namespace: &str) -> StorageResult<Vec<Vec<u8>>>;
}

/// Registered entity types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Account,
    AuthRequest,
    DataStore,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [
        EntityKind::Account,
        EntityKind::AuthRequest,
        EntityKind::DataStore,
    ];

    /// Namespace prefixed to every key of this type
    pub fn namespace(self) -> &'static str {
        match self {
            EntityKind::Account => "accounts",
            EntityKind::AuthRequest => "auth-requests",
            EntityKind::DataStore => "data-stores",
        }
    }
}

/// Contract for entities persisted through [`Store`]
pub trait Storable: Sized + Send + Sync {
    const KIND: EntityKind;

    /// Key unique within the type's namespace
    fn key(&self) -> Vec<u8>;

    fn serialize(&self) -> StorageResult<Vec<u8>>;

    /// Reconstruct an entity from its key and stored bytes
    fn deserialize(key: &[u8], data: &[u8]) -> StorageResult<Self>;
}

/// Typed access to a shared backend
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn Backend>,
}

impl Store {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Store backed by a fresh in-memory engine
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    pub async fn open(&self) -> StorageResult<()> {
        self.backend.open().await
    }

    pub async fn close(&self) -> StorageResult<()> {
        self.backend.close().await
    }

    /// Load the entity of type `T` stored under `key`
    pub async fn get<T: Storable>(&self, key: &[u8]) -> StorageResult<T> {
        let data = self.backend.get(T::KIND.namespace(), key).await?;
        T::deserialize(key, &data)
    }

    /// Load the entity of type `T` stored under `key`, `None` if absent
    pub async fn find<T: Storable>(&self, key: &[u8]) -> StorageResult<Option<T>> {
        match self.get(key).await {
            Ok(entity) => Ok(Some(entity)),
            Err(StorageError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn put<T: Storable>(&self, entity: &T) -> StorageResult<()> {
        let data = entity.serialize()?;
        self.backend
            .put(T::KIND.namespace(), &entity.key(), data)
            .await
    }

    pub async fn delete<T: Storable>(&self, entity: &T) -> StorageResult<()> {
        self.backend.delete(T::KIND.namespace(), &entity.key()).await
    }

    /// Keys of every stored entity of type `T`
    pub async fn list<T: Storable>(&self) -> StorageResult<Vec<Vec<u8>>> {
        self.backend.list(T::KIND.namespace()).await
    }
}
