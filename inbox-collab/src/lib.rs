//! # inbox-collab — Real-time collaborative editing for shared inbox documents
//!
//! Several editors change the same note or draft at once. Every document
//! has one authoritative copy in memory; each submitted edit is rebased
//! over whatever was committed since the editor's base version, applied,
//! versioned and fanned out to the room.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌─────────────────────────────┐
//! │ SyncClient  │ ◄─────────────────► │ SyncServer                  │
//! │ + Client-   │   bincode frames    │  └─ CollaborationSession    │
//! │   Document  │                     │       (one per connection)  │
//! └─────────────┘                     └──────────────┬──────────────┘
//!                                                    │
//!                          ┌─────────────────────────┼───────────────┐
//!                          ▼                         ▼               ▼
//!                 ┌──────────────────┐     ┌──────────────┐  ┌──────────────┐
//!                 │ DocumentState-   │     │ RoomHub      │  │ inbox-ot     │
//!                 │ Store (per-doc   │     │ (Transport,  │  │ (transform,  │
//!                 │ lock, lifecycle) │     │  fan-out)    │  │  apply)      │
//!                 └────────┬─────────┘     └──────────────┘  └──────────────┘
//!                          │ load / save
//!                          ▼
//!                 ┌──────────────────┐
//!                 │ Persistence      │
//!                 │ (RocksDB, memory)│
//!                 └──────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — edits, events and bincode wire frames
//! - [`error`] — engine error type and its client-facing kinds
//! - [`config`] — engine tunables
//! - [`document`] — authoritative document state and its operation log
//! - [`store`] — per-document serialization and load/release lifecycle
//! - [`session`] — join / submit / sync / leave for one editor
//! - [`persistence`] / [`transport`] — the engine's two outward seams
//! - [`broadcast`] — in-process mailbox transport with backpressure
//! - [`storage`] — RocksDB persistence
//! - [`server`] — WebSocket server
//! - [`client`] — WebSocket client and local replica

pub mod broadcast;
pub mod client;
pub mod config;
pub mod document;
pub mod error;
pub mod persistence;
pub mod protocol;
pub mod server;
pub mod session;
pub mod storage;
pub mod store;
pub mod transport;

// Re-exports for convenience
pub use broadcast::{HubStats, RoomHub};
pub use client::{ClientDocument, ClientError, ConnectionState, SyncClient};
pub use config::EngineConfig;
pub use document::{DocumentSnapshot, DocumentState, SessionId};
pub use error::CollabError;
pub use persistence::{MemoryPersistence, Persistence, PersistenceError};
pub use protocol::{
    ClientMessage, CollaborativeEdit, DocumentId, EditorId, ErrorKind, Event, ProtocolError,
    ServerMessage,
};
pub use server::{ServerConfig, ServerStats, SyncServer};
pub use session::{CollaborationSession, SessionPhase, SubmitOutcome, SyncOutcome};
pub use storage::{DocumentStore, StoreConfig};
pub use store::{DocumentHandle, DocumentStateStore};
pub use transport::{Transport, TransportError};

pub use inbox_ot::{Operation, OtError};
