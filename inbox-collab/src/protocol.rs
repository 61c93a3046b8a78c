//! Events and wire frames exchanged between editors and the engine.
//!
//! Frames are bincode-encoded (standard config, serde integration):
//! ```text
//! client ──► ClientMessage::{Join, Submit, Sync, Leave, Ping}
//! server ──► ServerMessage::{Event(Event), Pong}
//! ```
//!
//! The same [`Event`] values are handed to a [`Transport`](crate::Transport)
//! in-process, so an embedded deployment and the WebSocket server share one
//! vocabulary.

use inbox_ot::Operation;
use serde::{Deserialize, Serialize};

/// Opaque document identifier (ticket, conversation or template id).
pub type DocumentId = String;

/// Opaque identifier of one editing participant.
pub type EditorId = String;

/// A single edit submitted by an editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollaborativeEdit {
    pub editor_id: EditorId,
    pub document_id: DocumentId,
    pub operation: Operation,
    /// Document version the operation was authored against
    pub base_version: u64,
    /// Client-chosen id echoed back in the acknowledgment
    pub submission_id: String,
}

impl CollaborativeEdit {
    pub fn new(
        editor_id: impl Into<EditorId>,
        document_id: impl Into<DocumentId>,
        operation: Operation,
        base_version: u64,
        submission_id: impl Into<String>,
    ) -> Self {
        Self {
            editor_id: editor_id.into(),
            document_id: document_id.into(),
            operation,
            base_version,
            submission_id: submission_id.into(),
        }
    }
}

/// Error categories reported to editors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotJoined,
    AlreadyJoined,
    DocumentNotFound,
    InvalidBaseVersion,
    OutOfRangeOperation,
    Timeout,
    Persistence,
    /// Malformed frame (server only)
    Protocol,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::NotJoined => "not_joined",
            ErrorKind::AlreadyJoined => "already_joined",
            ErrorKind::DocumentNotFound => "document_not_found",
            ErrorKind::InvalidBaseVersion => "invalid_base_version",
            ErrorKind::OutOfRangeOperation => "out_of_range_operation",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Persistence => "persistence",
            ErrorKind::Protocol => "protocol",
        };
        f.write_str(name)
    }
}

/// Notifications delivered to editors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// Full snapshot, sent on join and on resync
    DocumentState {
        document_id: DocumentId,
        text: String,
        version: u64,
        active_editors: Vec<EditorId>,
    },
    /// Another editor's committed operation, in its applied form
    OperationApplied {
        document_id: DocumentId,
        operation: Operation,
        version: u64,
        editor_id: EditorId,
    },
    /// Acknowledgment for the submitter; `applied_operation` is set only
    /// when the server rewrote the operation.
    OperationAck {
        submission_id: String,
        new_version: u64,
        applied_operation: Option<Operation>,
    },
    EditorJoined {
        document_id: DocumentId,
        editor_id: EditorId,
    },
    EditorLeft {
        document_id: DocumentId,
        editor_id: EditorId,
    },
    /// Reply to a sync request whose version already matched
    InSync {
        document_id: DocumentId,
        version: u64,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl Event {
    /// Short event name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Event::DocumentState { .. } => "document_state",
            Event::OperationApplied { .. } => "operation_applied",
            Event::OperationAck { .. } => "operation_ack",
            Event::EditorJoined { .. } => "editor_joined",
            Event::EditorLeft { .. } => "editor_left",
            Event::InSync { .. } => "in_sync",
            Event::Error { .. } => "error",
        }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Event::Error {
            kind,
            message: message.into(),
        }
    }
}

/// Frames sent by a client connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientMessage {
    Join {
        document_id: DocumentId,
        editor_id: EditorId,
    },
    Submit(CollaborativeEdit),
    Sync {
        document_id: DocumentId,
        client_version: u64,
    },
    Leave,
    Ping,
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerMessage {
    Event(Event),
    Pong,
}

impl ClientMessage {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode_frame(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode_frame(bytes)
    }
}

impl ServerMessage {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode_frame(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode_frame(bytes)
    }
}

fn encode_frame<T: Serialize>(frame: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serde::encode_to_vec(frame, bincode::config::standard())
        .map_err(|e| ProtocolError::SerializationError(e.to_string()))
}

fn decode_frame<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let (frame, read) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
    if read != bytes.len() {
        return Err(ProtocolError::TrailingBytes(bytes.len() - read));
    }
    Ok(frame)
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    /// Frame decoded but bytes were left over
    TrailingBytes(usize),
    ConnectionClosed,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::SerializationError(e) => write!(f, "Serialization error: {e}"),
            ProtocolError::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            ProtocolError::TrailingBytes(n) => write!(f, "{n} trailing bytes after frame"),
            ProtocolError::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for ProtocolError {}
