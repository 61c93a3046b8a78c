//! RocksDB-backed persistent document store.
//!
//! Column families:
//! - `documents` — committed document text (LZ4 compressed), keyed by id
//! - `metadata`  — `DocumentMetadata` (bincode): sizes, save count, timestamps
//!
//! Text and metadata for one document are written in a single batch.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use async_trait::async_trait;
use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::{Deserialize, Serialize};

use crate::persistence::{Persistence, PersistenceError};

const CF_DOCUMENTS: &str = "documents";
const CF_METADATA: &str = "metadata";

const COLUMN_FAMILIES: &[&str] = &[CF_DOCUMENTS, CF_METADATA];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync every save (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("inbox_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 512,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Small caches for tests.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

/// Metadata stored alongside each document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub document_id: String,
    /// Length of the text in characters
    pub char_count: u64,
    /// Uncompressed text size in bytes
    pub text_size: u64,
    pub compressed_size: u64,
    /// Number of saves since creation
    pub save_count: u64,
    /// Seconds since epoch
    pub created_at: u64,
    pub updated_at: u64,
}

impl DocumentMetadata {
    fn new(document_id: &str) -> Self {
        let now = unix_now();
        Self {
            document_id: document_id.to_owned(),
            char_count: 0,
            text_size: 0,
            compressed_size: 0,
            save_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::SerializationError(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (meta, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
        Ok(meta)
    }
}

/// Storage errors.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// RocksDB internal error
    DatabaseError(String),
    NotFound(String),
    SerializationError(String),
    DeserializationError(String),
    CompressionError(String),
    /// Stored text is not valid UTF-8
    InvalidText(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DatabaseError(e) => write!(f, "Database error: {e}"),
            StoreError::NotFound(id) => write!(f, "Document not found: {id}"),
            StoreError::SerializationError(e) => write!(f, "Serialization error: {e}"),
            StoreError::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            StoreError::CompressionError(e) => write!(f, "Compression error: {e}"),
            StoreError::InvalidText(e) => write!(f, "Invalid stored text: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}

impl From<StoreError> for PersistenceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DeserializationError(_)
            | StoreError::CompressionError(_)
            | StoreError::InvalidText(_) => PersistenceError::Corrupt(e.to_string()),
            _ => PersistenceError::Backend(e.to_string()),
        }
    }
}

/// RocksDB-backed document store.
pub struct DocumentStore {
    /// RocksDB instance (single-threaded mode, concurrency via tokio)
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
    /// Saves performed by this handle
    saves: AtomicU64,
}

impl DocumentStore {
    /// Open the store, creating the database and column families if needed.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;
        log::info!("Opened document store at {}", config.path.display());

        Ok(Self {
            db,
            config,
            saves: AtomicU64::new(0),
        })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_DOCUMENTS => {
                // Values are already LZ4 framed
                opts.set_compression_type(DBCompressionType::None);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            CF_METADATA => {
                opts.set_compression_type(DBCompressionType::Lz4);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            _ => {}
        }

        opts
    }

    /// Save the full text of a document (LZ4 compressed).
    pub fn save_text(&self, document_id: &str, text: &str) -> Result<DocumentMetadata, StoreError> {
        let cf_docs = self.cf(CF_DOCUMENTS)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let compressed = lz4_flex::compress_prepend_size(text.as_bytes());

        let mut meta = match self.load_metadata(document_id) {
            Ok(meta) => meta,
            Err(StoreError::NotFound(_)) => DocumentMetadata::new(document_id),
            Err(e) => return Err(e),
        };
        meta.char_count = text.chars().count() as u64;
        meta.text_size = text.len() as u64;
        meta.compressed_size = compressed.len() as u64;
        meta.save_count += 1;
        meta.updated_at = unix_now();

        let key = document_id.as_bytes();
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_docs, key, &compressed);
        batch.put_cf(&cf_meta, key, meta.encode()?);

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;

        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(meta)
    }

    /// Load a document's text, `None` if it was never saved.
    pub fn load_text(&self, document_id: &str) -> Result<Option<String>, StoreError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        let Some(compressed) = self.db.get_cf(&cf, document_id.as_bytes())? else {
            return Ok(None);
        };
        let bytes = lz4_flex::decompress_size_prepended(&compressed)
            .map_err(|e| StoreError::CompressionError(e.to_string()))?;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| StoreError::InvalidText(e.to_string()))
    }

    pub fn document_exists(&self, document_id: &str) -> Result<bool, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        Ok(self.db.get_cf(&cf, document_id.as_bytes())?.is_some())
    }

    pub fn load_metadata(&self, document_id: &str) -> Result<DocumentMetadata, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        match self.db.get_cf(&cf, document_id.as_bytes())? {
            Some(bytes) => DocumentMetadata::decode(&bytes),
            None => Err(StoreError::NotFound(document_id.to_owned())),
        }
    }

    /// All stored document ids, in key order.
    pub fn list_documents(&self) -> Result<Vec<String>, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        let mut ids = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, _) = item?;
            let id = String::from_utf8(key.to_vec())
                .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
            ids.push(id);
        }
        Ok(ids)
    }

    pub fn delete_document(&self, document_id: &str) -> Result<(), StoreError> {
        let cf_docs = self.cf(CF_DOCUMENTS)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_docs, document_id.as_bytes());
        batch.delete_cf(&cf_meta, document_id.as_bytes());
        self.db.write(batch)?;
        Ok(())
    }

    /// Flush memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    /// Saves performed through this handle since it was opened.
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::DatabaseError(format!("Column family '{name}' not found")))
    }
}

#[async_trait]
impl Persistence for DocumentStore {
    async fn load(&self, document_id: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.load_text(document_id)?)
    }

    async fn save(&self, document_id: &str, text: &str) -> Result<(), PersistenceError> {
        let meta = self.save_text(document_id, text)?;
        log::debug!(
            "Persisted {document_id}: {} bytes -> {} compressed (save #{})",
            meta.text_size,
            meta.compressed_size,
            meta.save_count
        );
        Ok(())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Number of CPU cores for RocksDB parallelism.
fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}
