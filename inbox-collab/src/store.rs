//! Registry of loaded documents with per-document serialization.
//!
//! ```text
//! documents: RwLock<HashMap<id, Arc<DocumentSlot>>>
//!                                   │
//!                                   ├── released: AtomicBool
//!                                   └── state: Arc<Mutex<Option<DocumentState>>>
//! ```
//!
//! The map lock is only held long enough to find or insert a slot. All work
//! on a document (loading, applying, saving) happens under that slot's
//! mutex, so operations on one document are totally ordered while different
//! documents never contend. The first caller to lock an empty slot performs
//! the load; everyone queued behind it finds the state already present.
//!
//! A slot that has been released is flagged before it is unlocked. Callers
//! that were queued on it either retry against a fresh slot (`get_or_create`)
//! or see the document as gone (`find`).

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMappedMutexGuard, OwnedMutexGuard, RwLock};

use crate::config::EngineConfig;
use crate::document::DocumentState;
use crate::error::CollabError;
use crate::persistence::Persistence;
use crate::protocol::DocumentId;

#[derive(Default)]
struct DocumentSlot {
    released: AtomicBool,
    state: Arc<Mutex<Option<DocumentState>>>,
}

impl DocumentSlot {
    fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    fn mark_released(&self) {
        self.released.store(true, Ordering::Release);
    }
}

/// Exclusive access to one loaded document.
///
/// The document's lock is held for as long as the handle lives. Pass the
/// handle to [`DocumentStateStore::release`] to persist and unload it.
pub struct DocumentHandle {
    slot: Arc<DocumentSlot>,
    guard: OwnedMappedMutexGuard<Option<DocumentState>, DocumentState>,
}

impl Deref for DocumentHandle {
    type Target = DocumentState;

    fn deref(&self) -> &DocumentState {
        &self.guard
    }
}

impl DerefMut for DocumentHandle {
    fn deref_mut(&mut self) -> &mut DocumentState {
        &mut self.guard
    }
}

/// Loads, caches, serializes and releases document states.
pub struct DocumentStateStore {
    documents: RwLock<HashMap<DocumentId, Arc<DocumentSlot>>>,
    persistence: Arc<dyn Persistence>,
    config: EngineConfig,
}

impl DocumentStateStore {
    pub fn new(persistence: Arc<dyn Persistence>, config: EngineConfig) -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            persistence,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Lock the document, loading it from persistence on first access.
    pub async fn get_or_create(&self, document_id: &str) -> Result<DocumentHandle, CollabError> {
        loop {
            let slot = self.slot(document_id).await;
            let mut guard = self.lock_slot(document_id, &slot).await?;

            if slot.is_released() {
                log::debug!("Document {document_id} released while waiting; retrying");
                continue;
            }

            if guard.is_none() {
                match self.load(document_id).await {
                    Ok(state) => *guard = Some(state),
                    Err(e) => {
                        slot.mark_released();
                        self.evict(document_id, &slot).await;
                        return Err(e);
                    }
                }
            }

            return Self::handle(document_id, slot, guard);
        }
    }

    /// Lock the document if it is currently loaded.
    pub async fn find(&self, document_id: &str) -> Result<Option<DocumentHandle>, CollabError> {
        let Some(slot) = self.loaded_slot(document_id).await else {
            return Ok(None);
        };
        let guard = self.lock_slot(document_id, &slot).await?;
        Self::loaded_handle(document_id, slot, guard)
    }

    /// Like [`find`](Self::find), but waits for the lock however long it is
    /// held. Used for cleanup that must not be dropped on contention.
    pub async fn find_waiting(
        &self,
        document_id: &str,
    ) -> Result<Option<DocumentHandle>, CollabError> {
        let Some(slot) = self.loaded_slot(document_id).await else {
            return Ok(None);
        };
        let guard = slot.state.clone().lock_owned().await;
        Self::loaded_handle(document_id, slot, guard)
    }

    /// Save the document and unload it.
    ///
    /// A failed save is logged and the document is unloaded anyway.
    pub async fn release(&self, handle: DocumentHandle) {
        let DocumentHandle { slot, guard } = handle;
        let document_id = guard.document_id().to_owned();

        if guard.has_editors() {
            log::warn!(
                "Releasing {document_id} with {} active editors",
                guard.editor_count()
            );
        }

        match self.persistence.save(&document_id, guard.text()).await {
            Ok(()) => log::info!("Saved {document_id} at v{}", guard.version()),
            Err(e) => log::error!("Failed to save {document_id} on release: {e}"),
        }

        slot.mark_released();
        self.evict(&document_id, &slot).await;
        drop(guard);
    }

    /// Number of loaded documents.
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    pub async fn contains(&self, document_id: &str) -> bool {
        self.documents.read().await.contains_key(document_id)
    }

    /// Ids of loaded documents, sorted.
    pub async fn document_ids(&self) -> Vec<DocumentId> {
        let mut ids: Vec<DocumentId> = self.documents.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn loaded_slot(&self, document_id: &str) -> Option<Arc<DocumentSlot>> {
        self.documents.read().await.get(document_id).cloned()
    }

    async fn slot(&self, document_id: &str) -> Arc<DocumentSlot> {
        // Fast path: read lock
        {
            let documents = self.documents.read().await;
            if let Some(slot) = documents.get(document_id) {
                return slot.clone();
            }
        }

        let mut documents = self.documents.write().await;
        // Double-check after acquiring write lock
        if let Some(slot) = documents.get(document_id) {
            return slot.clone();
        }
        let slot = Arc::new(DocumentSlot::default());
        documents.insert(document_id.to_owned(), slot.clone());
        slot
    }

    async fn lock_slot(
        &self,
        document_id: &str,
        slot: &DocumentSlot,
    ) -> Result<OwnedMutexGuard<Option<DocumentState>>, CollabError> {
        tokio::time::timeout(self.config.lock_timeout, slot.state.clone().lock_owned())
            .await
            .map_err(|_| {
                log::warn!("Timed out waiting for lock on {document_id}");
                CollabError::Timeout(document_id.to_owned())
            })
    }

    async fn load(&self, document_id: &str) -> Result<DocumentState, CollabError> {
        let loaded = tokio::time::timeout(self.config.lock_timeout, self.persistence.load(document_id))
            .await
            .map_err(|_| {
                log::error!("Timed out loading {document_id}");
                CollabError::Timeout(document_id.to_owned())
            })?;

        let text = match loaded {
            Ok(text) => text,
            Err(e) => {
                log::error!("Failed to load {document_id}: {e}");
                return Err(e.into());
            }
        };

        let created = text.is_none();
        let state = DocumentState::new(
            document_id,
            text.unwrap_or_default(),
            self.config.log_compaction_threshold,
        );
        if created {
            log::info!("Created document {document_id}");
        } else {
            log::info!("Loaded document {document_id} ({} chars)", state.text().chars().count());
        }
        Ok(state)
    }

    /// Remove the map entry if it still points at `slot`.
    async fn evict(&self, document_id: &str, slot: &Arc<DocumentSlot>) {
        let mut documents = self.documents.write().await;
        if documents.get(document_id).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            documents.remove(document_id);
        }
    }

    fn loaded_handle(
        document_id: &str,
        slot: Arc<DocumentSlot>,
        guard: OwnedMutexGuard<Option<DocumentState>>,
    ) -> Result<Option<DocumentHandle>, CollabError> {
        if slot.is_released() || guard.is_none() {
            return Ok(None);
        }
        Self::handle(document_id, slot, guard).map(Some)
    }

    fn handle(
        document_id: &str,
        slot: Arc<DocumentSlot>,
        guard: OwnedMutexGuard<Option<DocumentState>>,
    ) -> Result<DocumentHandle, CollabError> {
        let guard = OwnedMutexGuard::try_map(guard, |state| state.as_mut())
            .map_err(|_| CollabError::DocumentNotFound(document_id.to_owned()))?;
        Ok(DocumentHandle { slot, guard })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{MemoryPersistence, PersistenceError};
    use async_trait::async_trait;
    use std::time::Duration;

    fn store_with(persistence: Arc<MemoryPersistence>) -> DocumentStateStore {
        DocumentStateStore::new(persistence, EngineConfig::for_testing())
    }

    #[tokio::test]
    async fn test_get_or_create_loads_once() {
        let persistence = Arc::new(MemoryPersistence::with_documents([("d", "hello")]));
        let store = store_with(persistence.clone());

        {
            let doc = store.get_or_create("d").await.unwrap();
            assert_eq!(doc.text(), "hello");
            assert_eq!(doc.version(), 0);
        }
        {
            let _doc = store.get_or_create("d").await.unwrap();
        }
        assert_eq!(persistence.load_count(), 1);
        assert!(store.contains("d").await);
    }

    #[tokio::test]
    async fn test_unknown_document_starts_empty() {
        let store = store_with(Arc::new(MemoryPersistence::new()));
        let doc = store.get_or_create("new").await.unwrap();
        assert_eq!(doc.text(), "");
        assert_eq!(doc.version(), 0);
    }

    #[tokio::test]
    async fn test_find_absent() {
        let store = store_with(Arc::new(MemoryPersistence::new()));
        assert!(store.find("d").await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_release_saves_and_unloads() {
        let persistence = Arc::new(MemoryPersistence::new());
        let store = store_with(persistence.clone());

        let mut doc = store.get_or_create("d").await.unwrap();
        doc.commit("alice", inbox_ot::Operation::insert(0, "hi"), "hi".into());
        store.release(doc).await;

        assert_eq!(persistence.get("d").await.as_deref(), Some("hi"));
        assert!(store.find("d").await.unwrap().is_none());
        assert_eq!(store.len().await, 0);

        // Reactivation reloads at version 0.
        let doc = store.get_or_create("d").await.unwrap();
        assert_eq!(doc.text(), "hi");
        assert_eq!(doc.version(), 0);
        assert_eq!(persistence.load_count(), 2);
    }

    #[tokio::test]
    async fn test_lock_timeout() {
        let store = store_with(Arc::new(MemoryPersistence::new()));
        let _held = store.get_or_create("d").await.unwrap();

        let err = store.get_or_create("d").await.err().unwrap();
        assert_eq!(err, CollabError::Timeout("d".into()));

        let err = store.find("d").await.err().unwrap();
        assert_eq!(err, CollabError::Timeout("d".into()));
    }

    #[tokio::test]
    async fn test_find_waiting_outlasts_lock_timeout() {
        let store = Arc::new(store_with(Arc::new(MemoryPersistence::new())));
        let held = store.get_or_create("d").await.unwrap();

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.find_waiting("d").await.map(|h| h.is_some()) })
        };
        tokio::time::sleep(store.config().lock_timeout + Duration::from_millis(100)).await;
        assert!(!waiter.is_finished());
        drop(held);

        assert_eq!(waiter.await.unwrap(), Ok(true));
        assert!(store.find_waiting("absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_waiter_on_released_slot_sees_not_found() {
        let store = Arc::new(store_with(Arc::new(MemoryPersistence::new())));
        let doc = store.get_or_create("d").await.unwrap();

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.find("d").await.map(|h| h.is_some()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.release(doc).await;

        assert_eq!(waiter.await.unwrap(), Ok(false));
    }

    #[tokio::test]
    async fn test_waiter_on_released_slot_reloads() {
        let persistence = Arc::new(MemoryPersistence::new());
        let store = Arc::new(store_with(persistence.clone()));
        let mut doc = store.get_or_create("d").await.unwrap();
        doc.commit("a", inbox_ot::Operation::insert(0, "x"), "x".into());

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                let doc = store.get_or_create("d").await?;
                Ok::<_, CollabError>(doc.text().to_owned())
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.release(doc).await;

        assert_eq!(waiter.await.unwrap().unwrap(), "x");
        assert_eq!(persistence.load_count(), 2);
    }

    struct FailingPersistence;

    #[async_trait]
    impl Persistence for FailingPersistence {
        async fn load(&self, _: &str) -> Result<Option<String>, PersistenceError> {
            Err(PersistenceError::Backend("offline".into()))
        }

        async fn save(&self, _: &str, _: &str) -> Result<(), PersistenceError> {
            Err(PersistenceError::Backend("offline".into()))
        }
    }

    #[tokio::test]
    async fn test_load_failure_leaves_no_slot() {
        let store = DocumentStateStore::new(Arc::new(FailingPersistence), EngineConfig::for_testing());
        let err = store.get_or_create("d").await.err().unwrap();
        assert!(matches!(err, CollabError::Persistence(_)));
        assert!(!store.contains("d").await);
    }
}
