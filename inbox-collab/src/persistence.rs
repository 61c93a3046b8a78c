//! Durable storage seam for document text.
//!
//! The engine only needs whole-text load/save: a document is loaded on its
//! first activation and saved once when its last editor leaves. The RocksDB
//! implementation lives in [`crate::storage`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

/// Load/save of committed document text.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Stored text, or `None` for a document that was never saved.
    async fn load(&self, document_id: &str) -> Result<Option<String>, PersistenceError>;

    async fn save(&self, document_id: &str, text: &str) -> Result<(), PersistenceError>;
}

/// Persistence errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    /// Storage backend failed
    Backend(String),
    /// Stored bytes could not be decoded
    Corrupt(String),
}

impl std::fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistenceError::Backend(e) => write!(f, "Storage backend error: {e}"),
            PersistenceError::Corrupt(e) => write!(f, "Corrupt stored document: {e}"),
        }
    }
}

impl std::error::Error for PersistenceError {}

/// In-process persistence with load/save counters.
#[derive(Default)]
pub struct MemoryPersistence {
    documents: RwLock<HashMap<String, String>>,
    loads: AtomicU64,
    saves: AtomicU64,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate with stored documents.
    pub fn with_documents<I, K, V>(documents: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let documents = documents
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            documents: RwLock::new(documents),
            ..Self::default()
        }
    }

    /// Currently stored text for a document.
    pub async fn get(&self, document_id: &str) -> Option<String> {
        self.documents.read().await.get(document_id).cloned()
    }

    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn load(&self, document_id: &str) -> Result<Option<String>, PersistenceError> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        Ok(self.documents.read().await.get(document_id).cloned())
    }

    async fn save(&self, document_id: &str, text: &str) -> Result<(), PersistenceError> {
        self.saves.fetch_add(1, Ordering::Relaxed);
        self.documents
            .write()
            .await
            .insert(document_id.to_owned(), text.to_owned());
        Ok(())
    }
}
