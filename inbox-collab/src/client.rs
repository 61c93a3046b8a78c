//! Client side of the collaboration protocol.
//!
//! - [`ClientDocument`]: local replica that keeps at most one edit in
//!   flight, buffers the rest, and rebases pending edits over remote ones
//! - [`SyncClient`]: WebSocket connection carrying protocol frames
//!
//! The two are independent: an application feeds events from the
//! `SyncClient` into its `ClientDocument` and sends whatever edits the
//! document hands back.

use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use inbox_ot::{apply, transform_pair, Operation, OtError};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::protocol::{
    ClientMessage, CollaborativeEdit, DocumentId, EditorId, ErrorKind, Event, ProtocolError,
    ServerMessage,
};

/// Errors raised by a [`ClientDocument`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// A local or rebased operation did not fit the local text
    Ot(OtError),
    /// An event skipped a version; the replica needs a resync
    VersionGap { expected: u64, received: u64 },
    /// Acknowledgment for an edit that is not in flight
    UnexpectedAck(String),
    /// The server rejected a request
    Rejected { kind: ErrorKind, message: String },
}

impl ClientError {
    /// Whether the replica should request a full resync.
    pub fn needs_resync(&self) -> bool {
        match self {
            ClientError::Ot(_) | ClientError::VersionGap { .. } | ClientError::UnexpectedAck(_) => {
                true
            }
            ClientError::Rejected { kind, .. } => matches!(
                kind,
                ErrorKind::InvalidBaseVersion | ErrorKind::OutOfRangeOperation
            ),
        }
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Ot(e) => write!(f, "{e}"),
            ClientError::VersionGap { expected, received } => {
                write!(f, "Expected version {expected}, received {received}")
            }
            ClientError::UnexpectedAck(id) => write!(f, "Unexpected acknowledgment {id}"),
            ClientError::Rejected { kind, message } => write!(f, "Rejected ({kind}): {message}"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<OtError> for ClientError {
    fn from(e: OtError) -> Self {
        ClientError::Ot(e)
    }
}

#[derive(Debug, Clone)]
struct PendingEdit {
    submission_id: String,
    operation: Operation,
}

/// Local replica of one document.
#[derive(Debug, Clone)]
pub struct ClientDocument {
    document_id: DocumentId,
    editor_id: EditorId,
    text: String,
    /// Last server version incorporated into `text`
    version: u64,
    in_flight: Option<PendingEdit>,
    /// Local edits waiting for the in-flight one to be acknowledged
    buffer: VecDeque<Operation>,
}

impl ClientDocument {
    /// Empty replica; the first `document_state` event fills it.
    pub fn new(document_id: impl Into<DocumentId>, editor_id: impl Into<EditorId>) -> Self {
        Self {
            document_id: document_id.into(),
            editor_id: editor_id.into(),
            text: String::new(),
            version: 0,
            in_flight: None,
            buffer: VecDeque::new(),
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn editor_id(&self) -> &str {
        &self.editor_id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Local edits not yet acknowledged (in flight plus buffered).
    pub fn pending_count(&self) -> usize {
        self.in_flight.iter().count() + self.buffer.len()
    }

    /// Operation currently awaiting acknowledgment.
    pub fn in_flight(&self) -> Option<&Operation> {
        self.in_flight.as_ref().map(|p| &p.operation)
    }

    /// Apply a local edit. Returns the edit to send now, if nothing else is
    /// in flight.
    pub fn edit(&mut self, operation: Operation) -> Result<Option<CollaborativeEdit>, ClientError> {
        self.text = apply(&self.text, &operation)?;
        if self.in_flight.is_some() {
            self.buffer.push_back(operation);
            return Ok(None);
        }
        Ok(Some(self.send_next(operation)))
    }

    /// Incorporate another editor's committed operation.
    pub fn apply_remote(&mut self, operation: &Operation, version: u64) -> Result<(), ClientError> {
        if version != self.version + 1 {
            return Err(ClientError::VersionGap {
                expected: self.version + 1,
                received: version,
            });
        }

        let mut remote = operation.clone();
        if let Some(pending) = &mut self.in_flight {
            let (mine, theirs) = transform_pair(&pending.operation, &remote);
            pending.operation = mine;
            remote = theirs;
        }
        for buffered in self.buffer.iter_mut() {
            let (mine, theirs) = transform_pair(buffered, &remote);
            *buffered = mine;
            remote = theirs;
        }

        self.text = apply(&self.text, &remote)?;
        self.version = version;
        Ok(())
    }

    /// Acknowledge the in-flight edit. Returns the next buffered edit to
    /// send, if any.
    pub fn acknowledge(
        &mut self,
        submission_id: &str,
        new_version: u64,
        applied: Option<&Operation>,
    ) -> Result<Option<CollaborativeEdit>, ClientError> {
        if !self
            .in_flight
            .as_ref()
            .is_some_and(|pending| pending.submission_id == submission_id)
        {
            return Err(ClientError::UnexpectedAck(submission_id.to_owned()));
        }
        if new_version != self.version + 1 {
            return Err(ClientError::VersionGap {
                expected: self.version + 1,
                received: new_version,
            });
        }
        let Some(pending) = self.in_flight.take() else {
            return Err(ClientError::UnexpectedAck(submission_id.to_owned()));
        };
        if let Some(applied) = applied {
            if *applied != pending.operation {
                log::warn!(
                    "Server applied {applied:?} for {submission_id}, replica expected {:?}",
                    pending.operation
                );
            }
        }

        self.version = new_version;
        Ok(self.buffer.pop_front().map(|op| self.send_next(op)))
    }

    /// Replace the replica with a server snapshot, discarding pending edits.
    /// Returns how many edits were discarded.
    pub fn reset(&mut self, text: String, version: u64) -> usize {
        let discarded = self.pending_count();
        self.text = text;
        self.version = version;
        self.in_flight = None;
        self.buffer.clear();
        discarded
    }

    /// Feed a server event. Returns an edit to send, if the event freed
    /// the in-flight slot.
    pub fn handle_event(&mut self, event: &Event) -> Result<Option<CollaborativeEdit>, ClientError> {
        match event {
            Event::DocumentState {
                document_id,
                text,
                version,
                ..
            } if *document_id == self.document_id => {
                let discarded = self.reset(text.clone(), *version);
                if discarded > 0 {
                    log::warn!("Resync of {document_id} discarded {discarded} local edits");
                }
                Ok(None)
            }
            Event::OperationApplied {
                document_id,
                operation,
                version,
                ..
            } if *document_id == self.document_id => {
                self.apply_remote(operation, *version)?;
                Ok(None)
            }
            Event::OperationAck {
                submission_id,
                new_version,
                applied_operation,
            } => self.acknowledge(submission_id, *new_version, applied_operation.as_ref()),
            Event::Error { kind, message } => Err(ClientError::Rejected {
                kind: *kind,
                message: message.clone(),
            }),
            _ => Ok(None),
        }
    }

    fn send_next(&mut self, operation: Operation) -> CollaborativeEdit {
        let submission_id = Uuid::new_v4().to_string();
        self.in_flight = Some(PendingEdit {
            submission_id: submission_id.clone(),
            operation: operation.clone(),
        });
        CollaborativeEdit::new(
            self.editor_id.clone(),
            self.document_id.clone(),
            operation,
            self.version,
            submission_id,
        )
    }
}

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// WebSocket client for the sync server.
pub struct SyncClient {
    server_url: String,
    state: Arc<RwLock<ConnectionState>>,
    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<ClientMessage>>,
    /// Decoded server frames for the application
    event_rx: Option<mpsc::Receiver<ServerMessage>>,
    event_tx: mpsc::Sender<ServerMessage>,
}

impl SyncClient {
    pub fn new(server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            server_url: server_url.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ServerMessage>> {
        self.event_rx.take()
    }

    /// Connect and spawn the reader and writer tasks.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let (ws_stream, _) = match tokio_tungstenite::connect_async(self.server_url.as_str()).await
        {
            Ok(connected) => connected,
            Err(e) => {
                log::warn!("Failed to connect to {}: {e}", self.server_url);
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<ClientMessage>(256);
        self.outgoing_tx = Some(out_tx);

        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let encoded = match msg.encode() {
                    Ok(encoded) => encoded,
                    Err(e) => {
                        log::error!("Dropping unencodable frame: {e}");
                        continue;
                    }
                };
                if ws_writer.send(Message::Binary(encoded.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Binary(data)) => match ServerMessage::decode(&data) {
                        Ok(frame) => {
                            if event_tx.send(frame).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => log::warn!("Failed to decode server frame: {e}"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            *state.write().await = ConnectionState::Disconnected;
        });

        *self.state.write().await = ConnectionState::Connected;
        log::info!("Connected to {}", self.server_url);
        Ok(())
    }

    /// Send a frame to the server.
    pub async fn send(&self, msg: ClientMessage) -> Result<(), ProtocolError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Err(ProtocolError::ConnectionClosed);
        }
        let tx = self.outgoing_tx.as_ref().ok_or(ProtocolError::ConnectionClosed)?;
        tx.send(msg).await.map_err(|_| ProtocolError::ConnectionClosed)
    }

    pub async fn join(
        &self,
        document_id: impl Into<DocumentId>,
        editor_id: impl Into<EditorId>,
    ) -> Result<(), ProtocolError> {
        self.send(ClientMessage::Join {
            document_id: document_id.into(),
            editor_id: editor_id.into(),
        })
        .await
    }

    pub async fn submit(&self, edit: CollaborativeEdit) -> Result<(), ProtocolError> {
        self.send(ClientMessage::Submit(edit)).await
    }

    pub async fn request_sync(
        &self,
        document_id: impl Into<DocumentId>,
        client_version: u64,
    ) -> Result<(), ProtocolError> {
        self.send(ClientMessage::Sync {
            document_id: document_id.into(),
            client_version,
        })
        .await
    }

    pub async fn leave(&self) -> Result<(), ProtocolError> {
        self.send(ClientMessage::Leave).await
    }

    pub async fn ping(&self) -> Result<(), ProtocolError> {
        self.send(ClientMessage::Ping).await
    }

    /// Close the connection once queued frames are written.
    pub async fn disconnect(&mut self) {
        self.outgoing_tx = None;
        *self.state.write().await = ConnectionState::Disconnected;
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}
