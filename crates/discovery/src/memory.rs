//! In-memory coordination store
//!
//! Shared by cloning; clones see the same nodes. Used for single-producer
//! deployments and as a test double with fault and latency injection.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, instrument};

use crate::error::StoreError;
use crate::store::{check_path, CoordinationStore, CreateOutcome, StoreEvent};

const EVENT_CAPACITY: usize = 1024;

struct Inner {
    nodes: Mutex<BTreeMap<String, Vec<u8>>>,
    events: broadcast::Sender<StoreEvent>,
    /// Number of upcoming calls that fail as unavailable
    fail_next: AtomicU32,
    /// Every call fails while set
    unavailable: AtomicBool,
    /// Artificial per-call latency (ms)
    latency_ms: AtomicU64,
    /// Successful creates
    create_count: AtomicU64,
}

/// Process-local coordination store
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                nodes: Mutex::new(BTreeMap::new()),
                events,
                fail_next: AtomicU32::new(0),
                unavailable: AtomicBool::new(false),
                latency_ms: AtomicU64::new(0),
                create_count: AtomicU64::new(0),
            }),
        }
    }

    /// Fail the next `n` calls with `StoreError::Unavailable`
    pub fn fail_next(&self, n: u32) {
        self.inner.fail_next.store(n, Ordering::SeqCst);
    }

    /// Fail every call until cleared
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.inner
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of nodes created so far
    pub fn create_count(&self) -> u64 {
        self.inner.create_count.load(Ordering::SeqCst)
    }

    /// Number of nodes currently stored
    pub fn len(&self) -> usize {
        self.lock_nodes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Paths of all nodes under `prefix`
    pub fn paths_under(&self, prefix: &str) -> Vec<String> {
        self.lock_nodes()
            .keys()
            .filter(|p| p.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn lock_nodes(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        // A panic while holding the lock leaves the map consistent (single-step ops)
        self.inner
            .nodes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn before_call(&self, path: &str) -> Result<(), StoreError> {
        let latency = self.inner.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("store marked unavailable"));
        }
        let injected = self
            .inner
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            debug!(path, "Injected store failure");
            return Err(StoreError::unavailable("injected failure"));
        }
        check_path(path)
    }

    fn notify(&self, event: StoreEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CoordinationStore for InMemoryStore {
    #[instrument(name = "memory_store_create", skip(self, data), fields(path = %path))]
    async fn create(&self, path: &str, data: Vec<u8>) -> Result<CreateOutcome, StoreError> {
        self.before_call(path).await?;
        let outcome = {
            let mut nodes = self.lock_nodes();
            match nodes.get(path) {
                Some(existing) => CreateOutcome::AlreadyExists(existing.clone()),
                None => {
                    nodes.insert(path.to_string(), data);
                    CreateOutcome::Created
                }
            }
        };
        if outcome == CreateOutcome::Created {
            self.inner.create_count.fetch_add(1, Ordering::SeqCst);
            self.notify(StoreEvent::created(path));
        }
        Ok(outcome)
    }

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.before_call(path).await?;
        Ok(self.lock_nodes().get(path).cloned())
    }

    async fn children(&self, parent: &str) -> Result<Vec<String>, StoreError> {
        self.before_call(parent).await?;
        let prefix = format!("{parent}/");
        Ok(self
            .lock_nodes()
            .range(prefix.clone()..)
            .take_while(|(p, _)| p.starts_with(&prefix))
            .filter_map(|(p, _)| {
                let rest = &p[prefix.len()..];
                (!rest.contains('/')).then(|| rest.to_string())
            })
            .collect())
    }

    #[instrument(name = "memory_store_delete", skip(self), fields(path = %path))]
    async fn delete(&self, path: &str) -> Result<bool, StoreError> {
        self.before_call(path).await?;
        let removed = self.lock_nodes().remove(path).is_some();
        if removed {
            self.notify(StoreEvent::deleted(path));
        }
        Ok(removed)
    }

    fn watch(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreEventKind;

    #[tokio::test]
    async fn test_create_is_first_writer_wins() {
        let store = InMemoryStore::new();
        let first = store.create("/r/ds/partitions/a", b"one".to_vec()).await.unwrap();
        let second = store.create("/r/ds/partitions/a", b"two".to_vec()).await.unwrap();

        assert_eq!(first, CreateOutcome::Created);
        assert_eq!(second, CreateOutcome::AlreadyExists(b"one".to_vec()));
        assert_eq!(store.create_count(), 1);
    }

    #[tokio::test]
    async fn test_children_lists_direct_children_only() {
        let store = InMemoryStore::new();
        store.create("/r/ds/partitions/a", vec![]).await.unwrap();
        store.create("/r/ds/partitions/b", vec![]).await.unwrap();
        store.create("/r/ds/partitions/b/nested", vec![]).await.unwrap();
        store.create("/r/ds/partitionsx", vec![]).await.unwrap();

        let children = store.children("/r/ds/partitions").await.unwrap();
        assert_eq!(children, vec!["a".to_string(), "b".to_string()]);
        assert!(store.children("/r/missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let store = InMemoryStore::new();
        store.fail_next(2);
        assert!(store.get("/r/a").await.is_err());
        assert!(store.get("/r/a").await.is_err());
        assert!(store.get("/r/a").await.unwrap().is_none());

        store.set_unavailable(true);
        assert!(store.get("/r/a").await.unwrap_err().is_transient());
        store.set_unavailable(false);
        assert!(store.get("/r/a").await.is_ok());
    }

    #[tokio::test]
    async fn test_watch_notifies_create_and_delete() {
        let store = InMemoryStore::new();
        let mut rx = store.watch();

        store.create("/r/ds/closed/a", vec![]).await.unwrap();
        assert!(store.delete("/r/ds/closed/a").await.unwrap());
        assert!(!store.delete("/r/ds/closed/a").await.unwrap());

        let created = rx.recv().await.unwrap();
        assert_eq!(created.kind, StoreEventKind::Created);
        let deleted = rx.recv().await.unwrap();
        assert_eq!(deleted.kind, StoreEventKind::Deleted);
        assert_eq!(deleted.path, "/r/ds/closed/a");
    }

    #[tokio::test]
    async fn test_invalid_path_rejected() {
        let store = InMemoryStore::new();
        let err = store.create("no-slash", vec![]).await.unwrap_err();
        assert!(!err.is_transient());
    }
}
