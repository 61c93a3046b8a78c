//! WebSocket sync server.
//!
//! Architecture:
//! ```text
//! Client A ──┐                        ┌── DocumentStateStore ── Persistence
//!            ├── connection task ─────┤        (per-document lock)   (RocksDB or memory)
//! Client B ──┘   CollaborationSession └── RoomHub
//!                    ▲                       │ mailbox per editor
//!                    └───────────────────────┘
//! ```
//!
//! Each connection owns one [`CollaborationSession`] and, once it has
//! joined, one `RoomHub` mailbox. A `select!` loop multiplexes incoming
//! frames, events from the mailbox and heartbeat pings. Closing the socket
//! leaves the document, which releases it when the last editor is gone.

use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::broadcast::{HubStats, RoomHub};
use crate::config::EngineConfig;
use crate::error::CollabError;
use crate::persistence::{MemoryPersistence, Persistence};
use crate::protocol::{ClientMessage, EditorId, ErrorKind, Event, ServerMessage};
use crate::session::CollaborationSession;
use crate::storage::{DocumentStore, StoreConfig, StoreError};
use crate::store::DocumentStateStore;

type BoxError = Box<dyn Error + Send + Sync>;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Events buffered per editor before deliveries are dropped
    pub mailbox_capacity: usize,
    /// WebSocket ping interval in seconds (0 disables)
    pub heartbeat_interval_secs: u64,
    /// Persistence storage path (None = in-memory only)
    pub storage_path: Option<PathBuf>,
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            mailbox_capacity: 256,
            heartbeat_interval_secs: 30,
            storage_path: None,
            engine: EngineConfig::default(),
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    /// Frames that failed to decode
    pub malformed_frames: u64,
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    store: Arc<DocumentStateStore>,
    hub: Arc<RoomHub>,
    stats: Arc<RwLock<ServerStats>>,
    /// Persistent document store (optional)
    storage: Option<Arc<DocumentStore>>,
}

impl SyncServer {
    /// Create a server, opening RocksDB storage if a path is configured.
    pub fn new(config: ServerConfig) -> Result<Self, StoreError> {
        let storage = match &config.storage_path {
            Some(path) => {
                let store_config = StoreConfig {
                    path: path.clone(),
                    ..StoreConfig::default()
                };
                Some(Arc::new(DocumentStore::open(store_config)?))
            }
            None => None,
        };

        let persistence: Arc<dyn Persistence> = match &storage {
            Some(storage) => storage.clone() as Arc<dyn Persistence>,
            None => Arc::new(MemoryPersistence::new()),
        };

        Ok(Self {
            store: Arc::new(DocumentStateStore::new(persistence, config.engine.clone())),
            hub: Arc::new(RoomHub::new(config.mailbox_capacity)),
            stats: Arc::new(RwLock::new(ServerStats::default())),
            storage,
            config,
        })
    }

    /// In-memory server with default configuration.
    pub fn with_defaults() -> Self {
        Self::in_memory(ServerConfig::default())
    }

    /// Server that ignores `storage_path` and keeps documents in memory.
    pub fn in_memory(config: ServerConfig) -> Self {
        let persistence: Arc<dyn Persistence> = Arc::new(MemoryPersistence::new());
        Self {
            store: Arc::new(DocumentStateStore::new(persistence, config.engine.clone())),
            hub: Arc::new(RoomHub::new(config.mailbox_capacity)),
            stats: Arc::new(RwLock::new(ServerStats::default())),
            storage: None,
            config: ServerConfig {
                storage_path: None,
                ..config
            },
        }
    }

    /// Server with persistence enabled at the given path.
    pub fn with_storage(
        bind_addr: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Result<Self, StoreError> {
        Self::new(ServerConfig {
            bind_addr: bind_addr.into(),
            storage_path: Some(path.into()),
            ..ServerConfig::default()
        })
    }

    /// Bind the configured address and serve until an accept error.
    pub async fn run(&self) -> Result<(), BoxError> {
        if let Some(storage) = &self.storage {
            let stored = storage.list_documents()?.len();
            log::info!("{stored} documents in {}", storage.path().display());
        }

        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Sync server listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Accept connections on an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let connection = Connection {
                addr,
                store: self.store.clone(),
                hub: self.hub.clone(),
                stats: self.stats.clone(),
                heartbeat: heartbeat_interval(self.config.heartbeat_interval_secs),
                session: None,
                editor_id: None,
                mailbox: None,
            };

            tokio::spawn(async move {
                if let Err(e) = connection.handle(stream).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    pub async fn hub_stats(&self) -> HubStats {
        self.hub.stats().await
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn store(&self) -> &Arc<DocumentStateStore> {
        &self.store
    }

    pub fn hub(&self) -> &Arc<RoomHub> {
        &self.hub
    }

    /// The persistent store, if configured.
    pub fn storage(&self) -> Option<&Arc<DocumentStore>> {
        self.storage.as_ref()
    }
}

fn heartbeat_interval(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// State of one client connection.
struct Connection {
    addr: SocketAddr,
    store: Arc<DocumentStateStore>,
    hub: Arc<RoomHub>,
    stats: Arc<RwLock<ServerStats>>,
    heartbeat: Option<Duration>,
    session: Option<CollaborationSession>,
    editor_id: Option<EditorId>,
    mailbox: Option<mpsc::Receiver<Event>>,
}

impl Connection {
    async fn handle(mut self, stream: TcpStream) -> Result<(), BoxError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        log::info!("WebSocket connection established from {}", self.addr);
        {
            let mut s = self.stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let result = self.run(ws_stream).await;
        self.close().await;
        result
    }

    async fn run(
        &mut self,
        ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
    ) -> Result<(), BoxError> {
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let mut heartbeat = self
            .heartbeat
            .map(|period| tokio::time::interval_at(tokio::time::Instant::now() + period, period));

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            if let Some(reply) = self.handle_frame(&data).await {
                                ws_sender.send(Message::Binary(reply.encode()?.into())).await?;
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {}", self.addr);
                            return Ok(());
                        }
                        Some(Err(e)) => {
                            log::error!("WebSocket error from {}: {e}", self.addr);
                            return Ok(());
                        }
                        _ => {}
                    }
                }

                event = next_event(&mut self.mailbox) => {
                    match event {
                        Some(event) => {
                            let frame = ServerMessage::Event(event).encode()?;
                            ws_sender.send(Message::Binary(frame.into())).await?;
                        }
                        None => {
                            log::info!(
                                "Mailbox for {:?} taken over by another connection; closing {}",
                                self.editor_id,
                                self.addr
                            );
                            self.mailbox = None;
                            return Ok(());
                        }
                    }
                }

                _ = tick(&mut heartbeat) => {
                    ws_sender.send(Message::Ping(Vec::new().into())).await?;
                }
            }
        }
    }

    /// Handle one binary frame. Returns a frame to send directly back on
    /// this socket, for replies that do not go through the mailbox.
    async fn handle_frame(&mut self, data: &[u8]) -> Option<ServerMessage> {
        {
            let mut s = self.stats.write().await;
            s.total_messages += 1;
            s.total_bytes += data.len() as u64;
        }

        let msg = match ClientMessage::decode(data) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("Failed to decode message from {}: {e}", self.addr);
                self.stats.write().await.malformed_frames += 1;
                return Some(error_frame(ErrorKind::Protocol, e.to_string()));
            }
        };

        match msg {
            ClientMessage::Join {
                document_id,
                editor_id,
            } => {
                if self.joined_session().is_some() {
                    return Some(collab_error_frame(CollabError::AlreadyJoined));
                }
                self.attach_mailbox(&editor_id).await;
                let mut session = CollaborationSession::new(self.store.clone(), self.hub.clone());
                // Failures are reported through the mailbox by the session.
                let _ = session.join(&document_id, &editor_id).await;
                self.session = Some(session);
                None
            }
            ClientMessage::Submit(edit) => {
                if self.editor_id.as_deref() != Some(edit.editor_id.as_str()) {
                    return Some(collab_error_frame(CollabError::NotJoined));
                }
                match self.joined_session() {
                    Some(session) => {
                        let _ = session.submit(edit).await;
                        None
                    }
                    None => Some(collab_error_frame(CollabError::NotJoined)),
                }
            }
            ClientMessage::Sync {
                document_id,
                client_version,
            } => match self.joined_session() {
                Some(session) => {
                    let _ = session.request_sync(&document_id, client_version).await;
                    None
                }
                None => Some(collab_error_frame(CollabError::NotJoined)),
            },
            ClientMessage::Leave => match self.joined_session() {
                Some(session) => session.leave().await.err().map(collab_error_frame),
                None => Some(collab_error_frame(CollabError::NotJoined)),
            },
            ClientMessage::Ping => Some(ServerMessage::Pong),
        }
    }

    fn joined_session(&mut self) -> Option<&mut CollaborationSession> {
        self.session.as_mut().filter(|s| s.is_joined())
    }

    /// Make sure this connection holds the mailbox for `editor_id`.
    async fn attach_mailbox(&mut self, editor_id: &str) {
        if self.editor_id.as_deref() == Some(editor_id) && self.mailbox.is_some() {
            return;
        }
        if let Some(previous) = self.editor_id.take() {
            self.mailbox = None;
            self.hub.disconnect_if_closed(&previous).await;
        }
        self.mailbox = Some(self.hub.connect(editor_id).await);
        self.editor_id = Some(editor_id.to_owned());
    }

    /// Implicit leave and mailbox cleanup after the socket is gone.
    async fn close(&mut self) {
        let addr = self.addr;
        if let Some(session) = self.joined_session() {
            if let Err(e) = session.leave().await {
                log::warn!("Implicit leave for {addr} failed: {e}");
            }
        }
        self.mailbox = None;
        if let Some(editor_id) = self.editor_id.take() {
            self.hub.disconnect_if_closed(&editor_id).await;
        }
        self.stats.write().await.active_connections -= 1;
    }
}

async fn next_event(mailbox: &mut Option<mpsc::Receiver<Event>>) -> Option<Event> {
    match mailbox {
        Some(rx) => rx.recv().await,
        // No mailbox until the first join
        None => std::future::pending().await,
    }
}

async fn tick(heartbeat: &mut Option<tokio::time::Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn error_frame(kind: ErrorKind, message: String) -> ServerMessage {
    ServerMessage::Event(Event::error(kind, message))
}

fn collab_error_frame(err: CollabError) -> ServerMessage {
    error_frame(err.kind(), err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.mailbox_capacity, 256);
        assert_eq!(config.heartbeat_interval_secs, 30);
        assert!(config.storage_path.is_none());
    }

    #[test]
    fn test_server_creation() {
        let server = SyncServer::with_defaults();
        assert_eq!(server.bind_addr(), "127.0.0.1:9090");
        assert!(server.storage().is_none());
    }

    #[test]
    fn test_server_with_storage() {
        let dir = tempfile::tempdir().unwrap();
        let server = SyncServer::with_storage("127.0.0.1:0", dir.path().join("db")).unwrap();
        assert!(server.storage().is_some());
    }

    #[tokio::test]
    async fn test_server_stats_initial() {
        let server = SyncServer::with_defaults();
        let stats = server.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.total_messages, 0);
        assert_eq!(stats.malformed_frames, 0);
        assert_eq!(server.hub_stats().await.active_rooms, 0);
    }

    #[test]
    fn test_heartbeat_interval() {
        assert_eq!(heartbeat_interval(0), None);
        assert_eq!(heartbeat_interval(15), Some(Duration::from_secs(15)));
    }

    #[test]
    fn test_error_frames() {
        match collab_error_frame(CollabError::NotJoined) {
            ServerMessage::Event(Event::Error { kind, .. }) => assert_eq!(kind, ErrorKind::NotJoined),
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}
