//! One editor's participation in one document.
//!
//! ```text
//!   Idle ──join──► Joined ──leave──► Left
//!                    │  ▲
//!                    └──┘ submit / request_sync
//! ```
//!
//! Every operation that touches a document does all of its work, including
//! the events it emits, while holding that document's lock. Peers therefore
//! observe `operation_applied` events in version order.
//!
//! Rejections are returned to the caller and also delivered to the editor as
//! an `error` event; they are never broadcast.

use std::sync::Arc;

use inbox_ot::{apply, transform_against_sequence, Operation};
use uuid::Uuid;

use crate::document::{DocumentSnapshot, DocumentState, SessionId};
use crate::error::CollabError;
use crate::protocol::{CollaborativeEdit, DocumentId, EditorId, Event};
use crate::store::{DocumentHandle, DocumentStateStore};
use crate::transport::Transport;

/// Lifecycle of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Joined {
        document_id: DocumentId,
        editor_id: EditorId,
    },
    Left,
}

/// Result of an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub version: u64,
    /// The operation as committed
    pub operation: Operation,
    /// Whether the server rewrote the submitted operation
    pub rewritten: bool,
}

/// Result of a sync request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The client already holds the current version
    InSync { version: u64 },
    /// The client was sent a full snapshot
    Resync(DocumentSnapshot),
}

/// Session state machine driving the store and transport for one editor.
pub struct CollaborationSession {
    store: Arc<DocumentStateStore>,
    transport: Arc<dyn Transport>,
    session_id: SessionId,
    phase: SessionPhase,
}

impl CollaborationSession {
    pub fn new(store: Arc<DocumentStateStore>, transport: Arc<dyn Transport>) -> Self {
        Self {
            store,
            transport,
            session_id: Uuid::new_v4(),
            phase: SessionPhase::Idle,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    pub fn is_joined(&self) -> bool {
        matches!(self.phase, SessionPhase::Joined { .. })
    }

    pub fn document_id(&self) -> Option<&str> {
        match &self.phase {
            SessionPhase::Joined { document_id, .. } => Some(document_id),
            _ => None,
        }
    }

    pub fn editor_id(&self) -> Option<&str> {
        match &self.phase {
            SessionPhase::Joined { editor_id, .. } => Some(editor_id),
            _ => None,
        }
    }

    /// Join `document_id` as `editor_id`.
    ///
    /// Loads the document if needed, replies with `document_state` and tells
    /// the other room members with `editor_joined`.
    pub async fn join(
        &mut self,
        document_id: &str,
        editor_id: &str,
    ) -> Result<DocumentSnapshot, CollabError> {
        if self.phase != SessionPhase::Idle {
            return Err(self.reject(editor_id, CollabError::AlreadyJoined).await);
        }

        let mut doc = match self.store.get_or_create(document_id).await {
            Ok(doc) => doc,
            Err(e) => return Err(self.reject(editor_id, e).await),
        };

        let newly_active = doc.add_editor(editor_id, self.session_id);
        self.transport.join_room(document_id, editor_id).await;

        let snapshot = doc.snapshot();
        self.send(editor_id, &snapshot.clone().into_event()).await;
        if newly_active {
            self.broadcast(
                &doc,
                &Event::EditorJoined {
                    document_id: document_id.to_owned(),
                    editor_id: editor_id.to_owned(),
                },
                editor_id,
            )
            .await;
        } else {
            log::debug!("Editor {editor_id} joined {document_id} again from a new session");
        }
        drop(doc);

        log::info!(
            "Editor {editor_id} joined {document_id} at v{} ({} active)",
            snapshot.version,
            snapshot.active_editors.len()
        );
        self.phase = SessionPhase::Joined {
            document_id: document_id.to_owned(),
            editor_id: editor_id.to_owned(),
        };
        Ok(snapshot)
    }

    /// Commit an edit, rewriting it first if it was authored against an
    /// older version.
    pub async fn submit(&mut self, edit: CollaborativeEdit) -> Result<SubmitOutcome, CollabError> {
        let (document_id, editor_id) = match &self.phase {
            SessionPhase::Joined {
                document_id,
                editor_id,
            } if *document_id == edit.document_id && *editor_id == edit.editor_id => {
                (document_id.clone(), editor_id.clone())
            }
            _ => return Err(self.reject(&edit.editor_id, CollabError::NotJoined).await),
        };

        let mut doc = match self.joined_document(&document_id, &editor_id).await {
            Ok(doc) => doc,
            Err(e) => return Err(self.reject(&editor_id, e).await),
        };

        let (operation, text) = match rebase_and_apply(&doc, &edit) {
            Ok(applied) => applied,
            Err(e) => return Err(self.reject(&editor_id, e).await),
        };

        doc.mark_seen(&editor_id, self.session_id, edit.base_version);
        let version = doc.commit(&editor_id, operation.clone(), text);
        let rewritten = operation != edit.operation;
        log::debug!(
            "{document_id} v{version}: {} by {editor_id}{}",
            operation.kind(),
            if rewritten { " (rewritten)" } else { "" }
        );

        self.broadcast(
            &doc,
            &Event::OperationApplied {
                document_id: document_id.clone(),
                operation: operation.clone(),
                version,
                editor_id: editor_id.clone(),
            },
            &editor_id,
        )
        .await;
        self.send(
            &editor_id,
            &Event::OperationAck {
                submission_id: edit.submission_id,
                new_version: version,
                applied_operation: rewritten.then(|| operation.clone()),
            },
        )
        .await;
        drop(doc);

        Ok(SubmitOutcome {
            version,
            operation,
            rewritten,
        })
    }

    /// Send a full snapshot unless the client is already at the current
    /// version, in which case it gets `in_sync`.
    pub async fn request_sync(
        &mut self,
        document_id: &str,
        client_version: u64,
    ) -> Result<SyncOutcome, CollabError> {
        let editor_id = match &self.phase {
            SessionPhase::Joined {
                document_id: joined,
                editor_id,
            } if joined == document_id => editor_id.clone(),
            SessionPhase::Joined { editor_id, .. } => {
                let editor_id = editor_id.clone();
                return Err(self.reject(&editor_id, CollabError::NotJoined).await);
            }
            _ => return Err(CollabError::NotJoined),
        };

        let mut doc = match self.joined_document(document_id, &editor_id).await {
            Ok(doc) => doc,
            Err(e) => return Err(self.reject(&editor_id, e).await),
        };

        let version = doc.version();
        doc.mark_seen(&editor_id, self.session_id, version);
        if client_version == version {
            self.send(
                &editor_id,
                &Event::InSync {
                    document_id: document_id.to_owned(),
                    version,
                },
            )
            .await;
            return Ok(SyncOutcome::InSync { version });
        }

        log::debug!("Resync {editor_id} on {document_id}: v{client_version} -> v{version}");
        let snapshot = doc.snapshot();
        self.send(&editor_id, &snapshot.clone().into_event()).await;
        Ok(SyncOutcome::Resync(snapshot))
    }

    /// Leave the document, releasing it if this was the last editor.
    ///
    /// Waits for the document lock without the lock timeout.
    pub async fn leave(&mut self) -> Result<(), CollabError> {
        let (document_id, editor_id) = match &self.phase {
            SessionPhase::Joined {
                document_id,
                editor_id,
            } => (document_id.clone(), editor_id.clone()),
            _ => return Err(CollabError::NotJoined),
        };

        let doc = match self.store.find_waiting(&document_id).await {
            Ok(doc) => doc,
            Err(e) => {
                log::warn!("Editor {editor_id} could not leave {document_id}: {e}");
                return Err(e);
            }
        };

        self.transport.leave_room(&document_id, &editor_id).await;
        self.phase = SessionPhase::Left;

        let Some(mut doc) = doc else {
            log::debug!("Editor {editor_id} left {document_id} after it was released");
            return Ok(());
        };

        let editor_left = doc.remove_editor(&editor_id, self.session_id);
        if !doc.has_editors() {
            log::info!("Editor {editor_id} left {document_id}; releasing");
            self.store.release(doc).await;
        } else if !editor_left {
            log::debug!("Editor {editor_id} left {document_id} but is still joined elsewhere");
        } else {
            self.broadcast(
                &doc,
                &Event::EditorLeft {
                    document_id: document_id.clone(),
                    editor_id: editor_id.clone(),
                },
                &editor_id,
            )
            .await;
            log::info!("Editor {editor_id} left {document_id} ({} active)", doc.editor_count());
        }
        Ok(())
    }

    /// Lock the joined document, checking this session is still part of it.
    async fn joined_document(
        &self,
        document_id: &str,
        editor_id: &str,
    ) -> Result<DocumentHandle, CollabError> {
        let doc = self
            .store
            .find(document_id)
            .await?
            .ok_or_else(|| CollabError::DocumentNotFound(document_id.to_owned()))?;
        if !doc.has_session(editor_id, self.session_id) {
            return Err(CollabError::NotJoined);
        }
        Ok(doc)
    }

    /// Log a rejection and report it to the editor.
    async fn reject(&self, editor_id: &str, err: CollabError) -> CollabError {
        if err.is_client_violation() {
            log::warn!("Rejected request from {editor_id}: {err}");
        } else {
            log::info!("Request from {editor_id} failed: {err}");
        }
        self.send(editor_id, &Event::error(err.kind(), err.to_string()))
            .await;
        err
    }

    async fn send(&self, editor_id: &str, event: &Event) {
        if let Err(e) = self.transport.send_to_editor(editor_id, event).await {
            log::warn!("Could not deliver {} to {editor_id}: {e}", event.name());
        }
    }

    /// Broadcast to the document's room. Takes the handle so callers can
    /// only broadcast while holding the document lock.
    async fn broadcast(&self, doc: &DocumentHandle, event: &Event, exclude: &str) {
        if let Err(e) = self
            .transport
            .broadcast_to_room(doc.document_id(), event, Some(exclude))
            .await
        {
            log::warn!("Broadcast of {} on {} failed: {e}", event.name(), doc.document_id());
        }
    }
}

/// Rewrite `edit` against everything committed after its base version and
/// apply it to the current text.
fn rebase_and_apply(
    doc: &DocumentState,
    edit: &CollaborativeEdit,
) -> Result<(Operation, String), CollabError> {
    let current = doc.version();
    let invalid_base = || CollabError::InvalidBaseVersion {
        base: edit.base_version,
        current,
    };

    let operation = if edit.base_version == current {
        edit.operation.clone()
    } else if edit.base_version > current {
        return Err(invalid_base());
    } else {
        let history = doc.operations_since(edit.base_version).ok_or_else(invalid_base)?;
        transform_against_sequence(&edit.operation, history)
    };

    let text = apply(doc.text(), &operation)?;
    Ok((operation, text))
}
