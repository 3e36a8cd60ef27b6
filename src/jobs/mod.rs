/// Background jobs
///
/// [`StorageCleaner`] periodically deletes every stored entity of one type
/// that matches a staleness predicate.
use crate::storage::{Storable, Store};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::{marker::PhantomData, sync::Arc, time::Duration};
use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub mod tasks;

type Predicate<T> = dyn Fn(&T, DateTime<Utc>) -> bool + Send + Sync;

/// Outcome of a single sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub deleted: usize,
    pub failed: usize,
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Janitor bound to one entity type and one predicate
pub struct StorageCleaner<T> {
    store: Store,
    predicate: Arc<Predicate<T>>,
    running: Mutex<Option<Running>>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Storable + 'static> StorageCleaner<T> {
    pub fn new<F>(store: Store, predicate: F) -> Self
    where
        F: Fn(&T, DateTime<Utc>) -> bool + Send + Sync + 'static,
    {
        Self {
            store,
            predicate: Arc::new(predicate),
            running: Mutex::new(None),
            _entity: PhantomData,
        }
    }

    /// Start sweeping every `period`, first sweep one period from now.
    /// Does nothing if the cleaner is already running.
    pub fn start(&self, period: Duration) {
        let mut running = self.running.lock();
        if running.is_some() {
            warn!(
                namespace = T::KIND.namespace(),
                "Storage cleaner already running"
            );
            return;
        }

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let store = self.store.clone();
        let predicate = Arc::clone(&self.predicate);

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!(
                namespace = T::KIND.namespace(),
                interval_secs = period.as_secs(),
                "Storage cleaner started"
            );

            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        sweep::<T>(&store, predicate.as_ref()).await;
                    }
                }
            }

            info!(namespace = T::KIND.namespace(), "Storage cleaner stopped");
        });

        *running = Some(Running { cancel, handle });
    }

    /// Cancel future sweeps and wait for an in-flight sweep to finish
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        if let Some(Running { cancel, handle }) = running {
            cancel.cancel();
            if let Err(e) = handle.await {
                error!(
                    namespace = T::KIND.namespace(),
                    "Storage cleaner task failed: {}", e
                );
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Run one sweep right away
    pub async fn sweep(&self) -> SweepReport {
        sweep::<T>(&self.store, self.predicate.as_ref()).await
    }
}

async fn sweep<T: Storable>(store: &Store, predicate: &Predicate<T>) -> SweepReport {
    let namespace = T::KIND.namespace();
    let mut report = SweepReport::default();

    let keys = match store.list::<T>().await {
        Ok(keys) => keys,
        Err(e) => {
            error!(namespace, "Failed to list entities for cleanup: {}", e);
            return report;
        }
    };

    let now = Utc::now();
    for key in keys {
        report.scanned += 1;

        let entity = match store.get::<T>(&key).await {
            Ok(entity) => entity,
            Err(e) => {
                warn!(
                    namespace,
                    key = %String::from_utf8_lossy(&key),
                    "Failed to load entity during cleanup: {}", e
                );
                report.failed += 1;
                continue;
            }
        };

        if !predicate(&entity, now) {
            continue;
        }

        match store.delete(&entity).await {
            Ok(()) => report.deleted += 1,
            Err(e) => {
                warn!(
                    namespace,
                    key = %String::from_utf8_lossy(&key),
                    "Failed to delete stale entity: {}", e
                );
                report.failed += 1;
            }
        }
    }

    if report.deleted > 0 || report.failed > 0 {
        info!(
            namespace,
            scanned = report.scanned,
            deleted = report.deleted,
            failed = report.failed,
            "Storage cleanup finished"
        );
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{
        Backend, EntityKind, MemoryBackend, StorageError, StorageResult,
    };
    use async_trait::async_trait;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        name: String,
        stale: bool,
    }

    impl Storable for Item {
        const KIND: EntityKind = EntityKind::AuthRequest;

        fn key(&self) -> Vec<u8> {
            self.name.as_bytes().to_vec()
        }

        fn serialize(&self) -> StorageResult<Vec<u8>> {
            Ok(vec![self.stale as u8])
        }

        fn deserialize(key: &[u8], data: &[u8]) -> StorageResult<Self> {
            Ok(Item {
                name: String::from_utf8_lossy(key).into_owned(),
                stale: data.first() == Some(&1),
            })
        }
    }

    /// Memory backend refusing to delete one key
    struct StubbornBackend {
        inner: MemoryBackend,
        protected: Vec<u8>,
    }

    #[async_trait]
    impl Backend for StubbornBackend {
        async fn open(&self) -> StorageResult<()> {
            self.inner.open().await
        }
        async fn close(&self) -> StorageResult<()> {
            self.inner.close().await
        }
        async fn get(&self, namespace: &str, key: &[u8]) -> StorageResult<Vec<u8>> {
            self.inner.get(namespace, key).await
        }
        async fn put(&self, namespace: &str, key: &[u8], value: Vec<u8>) -> StorageResult<()> {
            self.inner.put(namespace, key, value).await
        }
        async fn delete(&self, namespace: &str, key: &[u8]) -> StorageResult<()> {
            if key == self.protected.as_slice() {
                return Err(StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "protected",
                )));
            }
            self.inner.delete(namespace, key).await
        }
        async fn list(&self, namespace: &str) -> StorageResult<Vec<Vec<u8>>> {
            self.inner.list(namespace).await
        }
    }

    async fn seed(store: &Store) {
        for (name, stale) in [("a", true), ("b", false), ("c", true), ("d", true)] {
            store
                .put(&Item {
                    name: name.to_string(),
                    stale,
                })
                .await
                .unwrap();
        }
    }

    async fn remaining(store: &Store) -> Vec<String> {
        store
            .list::<Item>()
            .await
            .unwrap()
            .into_iter()
            .map(|k| String::from_utf8(k).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_sweep_deletes_only_matches() {
        let store = Store::memory();
        store.open().await.unwrap();
        seed(&store).await;

        let cleaner = StorageCleaner::<Item>::new(store.clone(), |item, _| item.stale);
        let report = cleaner.sweep().await;

        assert_eq!(report.scanned, 4);
        assert_eq!(report.deleted, 3);
        assert_eq!(report.failed, 0);
        assert_eq!(remaining(&store).await, vec!["b"]);
    }

    #[tokio::test]
    async fn test_failed_delete_does_not_abort_sweep() {
        let store = Store::new(Arc::new(StubbornBackend {
            inner: MemoryBackend::new(),
            protected: b"a".to_vec(),
        }));
        store.open().await.unwrap();
        seed(&store).await;

        let cleaner = StorageCleaner::<Item>::new(store.clone(), |item, _| item.stale);
        let report = cleaner.sweep().await;

        assert_eq!(report.deleted, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(remaining(&store).await, vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_sweeps_periodically_and_stop_halts() {
        let store = Store::memory();
        store.open().await.unwrap();

        let cleaner = StorageCleaner::<Item>::new(store.clone(), |item, _| item.stale);
        cleaner.start(Duration::from_secs(60));
        cleaner.start(Duration::from_secs(1));
        assert!(cleaner.is_running());

        seed(&store).await;
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(remaining(&store).await, vec!["b"]);

        cleaner.stop().await;
        assert!(!cleaner.is_running());

        store
            .put(&Item {
                name: "e".to_string(),
                stale: true,
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(remaining(&store).await, vec!["b", "e"]);

        // Restart after stop is allowed
        cleaner.start(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(remaining(&store).await, vec!["b"]);
        cleaner.stop().await;
    }
}
