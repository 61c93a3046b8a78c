//! Persistent storage for document text.
//!
//! ```text
//! ┌────────────────────┐  release   ┌──────────────────────────────────┐
//! │ DocumentStateStore │ ─────────► │ DocumentStore (RocksDB)          │
//! │ (in-memory)        │ ◄───────── │   CF "documents" — text (LZ4)    │
//! └────────────────────┘  first use │   CF "metadata"  — doc metadata  │
//!                                   └──────────────────────────────────┘
//! ```

pub mod rocks;

pub use rocks::{DocumentMetadata, DocumentStore, StoreConfig, StoreError};
