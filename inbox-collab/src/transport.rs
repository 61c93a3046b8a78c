//! Delivery seam between sessions and connected editors.

use async_trait::async_trait;

use crate::protocol::Event;

/// Room-scoped event delivery.
///
/// Delivery is fire-and-forget from the engine's point of view: failures are
/// logged by the caller and never undo a committed operation.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Called once per joining session. An editor joined from two sessions
    /// stays a member until both have called `leave_room`.
    async fn join_room(&self, document_id: &str, editor_id: &str);

    async fn leave_room(&self, document_id: &str, editor_id: &str);

    /// Deliver `event` to every room member except `exclude`.
    ///
    /// Returns the number of members the event was handed to.
    async fn broadcast_to_room(
        &self,
        document_id: &str,
        event: &Event,
        exclude: Option<&str>,
    ) -> Result<usize, TransportError>;

    async fn send_to_editor(&self, editor_id: &str, event: &Event) -> Result<(), TransportError>;
}

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No mailbox is registered for the editor
    UnknownEditor(String),
    /// The editor's mailbox is at capacity
    MailboxFull(String),
    /// The editor's receiving side is gone
    Closed(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::UnknownEditor(id) => write!(f, "No mailbox for editor {id}"),
            TransportError::MailboxFull(id) => write!(f, "Mailbox full for editor {id}"),
            TransportError::Closed(id) => write!(f, "Mailbox closed for editor {id}"),
        }
    }
}

impl std::error::Error for TransportError {}
