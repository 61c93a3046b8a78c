//! Engine-level errors.

use inbox_ot::OtError;

use crate::persistence::PersistenceError;
use crate::protocol::{DocumentId, ErrorKind};

/// Errors returned by [`CollaborationSession`](crate::CollaborationSession)
/// and [`DocumentStateStore`](crate::DocumentStateStore).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollabError {
    /// The session has not joined the target document
    NotJoined,
    /// `join` called on a session that already joined or left
    AlreadyJoined,
    /// The document was released or never loaded
    DocumentNotFound(DocumentId),
    /// Base version is ahead of the document or below the retained log
    InvalidBaseVersion { base: u64, current: u64 },
    /// The (transformed) operation does not fit the current text
    OutOfRange(OtError),
    /// The document lock or its load did not complete in time
    Timeout(DocumentId),
    Persistence(String),
}

impl CollabError {
    /// Wire category for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CollabError::NotJoined => ErrorKind::NotJoined,
            CollabError::AlreadyJoined => ErrorKind::AlreadyJoined,
            CollabError::DocumentNotFound(_) => ErrorKind::DocumentNotFound,
            CollabError::InvalidBaseVersion { .. } => ErrorKind::InvalidBaseVersion,
            CollabError::OutOfRange(_) => ErrorKind::OutOfRangeOperation,
            CollabError::Timeout(_) => ErrorKind::Timeout,
            CollabError::Persistence(_) => ErrorKind::Persistence,
        }
    }

    /// The submitting client broke the protocol contract. Never retried.
    pub fn is_client_violation(&self) -> bool {
        matches!(
            self,
            CollabError::NotJoined
                | CollabError::AlreadyJoined
                | CollabError::InvalidBaseVersion { .. }
                | CollabError::OutOfRange(_)
        )
    }

    /// The caller may recover by rejoining, resyncing or retrying.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CollabError::DocumentNotFound(_) | CollabError::Timeout(_) | CollabError::Persistence(_)
        )
    }
}

impl std::fmt::Display for CollabError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollabError::NotJoined => write!(f, "Session has not joined this document"),
            CollabError::AlreadyJoined => write!(f, "Session has already joined a document"),
            CollabError::DocumentNotFound(id) => write!(f, "Document not found: {id}"),
            CollabError::InvalidBaseVersion { base, current } => {
                write!(f, "Base version {base} is not valid for document at version {current}")
            }
            CollabError::OutOfRange(e) => write!(f, "{e}"),
            CollabError::Timeout(id) => write!(f, "Timed out waiting for document {id}"),
            CollabError::Persistence(e) => write!(f, "Persistence error: {e}"),
        }
    }
}

impl std::error::Error for CollabError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CollabError::OutOfRange(e) => Some(e),
            _ => None,
        }
    }
}

impl From<OtError> for CollabError {
    fn from(e: OtError) -> Self {
        CollabError::OutOfRange(e)
    }
}

impl From<PersistenceError> for CollabError {
    fn from(e: PersistenceError) -> Self {
        CollabError::Persistence(e.to_string())
    }
}
