//! In-process fan-out of events to editors, with backpressure.
//!
//! Every connected editor owns a bounded `mpsc` mailbox. Rooms map each
//! member to the number of sessions it joined with; a broadcast walks the
//! members and
//! `try_send`s into each mailbox, so one slow editor never stalls the
//! document lock held by the broadcasting session. Deliveries that find a
//! full or closed mailbox are dropped and counted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};

use crate::protocol::{DocumentId, EditorId, Event};
use crate::transport::{Transport, TransportError};

/// Statistics for monitoring hub health.
#[derive(Debug, Clone, Default)]
pub struct HubStats {
    pub events_sent: u64,
    pub events_dropped: u64,
    pub connected_editors: usize,
    pub active_rooms: usize,
}

/// Atomic counters, updated without taking the hub's locks.
#[derive(Default)]
struct AtomicHubStats {
    events_sent: AtomicU64,
    events_dropped: AtomicU64,
}

/// Mailbox-per-editor transport.
pub struct RoomHub {
    mailboxes: RwLock<HashMap<EditorId, mpsc::Sender<Event>>>,
    /// Document → member → joined session count
    rooms: RwLock<HashMap<DocumentId, HashMap<EditorId, usize>>>,
    /// Events buffered per editor before deliveries are dropped
    capacity: usize,
    atomic_stats: AtomicHubStats,
}

impl RoomHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            mailboxes: RwLock::new(HashMap::new()),
            rooms: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            atomic_stats: AtomicHubStats::default(),
        }
    }

    /// Register a mailbox for `editor_id` and return its receiving end.
    ///
    /// A second registration for the same editor replaces the first; the
    /// old receiver sees its channel close.
    pub async fn connect(&self, editor_id: &str) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let previous = self
            .mailboxes
            .write()
            .await
            .insert(editor_id.to_owned(), tx);
        if previous.is_some() {
            log::debug!("Editor {editor_id} reconnected; previous mailbox replaced");
        }
        rx
    }

    /// Drop the editor's mailbox and every room membership it holds.
    pub async fn disconnect(&self, editor_id: &str) {
        self.mailboxes.write().await.remove(editor_id);
        let mut rooms = self.rooms.write().await;
        rooms.retain(|_, members| {
            members.remove(editor_id);
            !members.is_empty()
        });
    }

    /// Drop the editor's mailbox only if its receiver is gone, so a newer
    /// connection for the same editor keeps its registration.
    pub async fn disconnect_if_closed(&self, editor_id: &str) -> bool {
        let mut mailboxes = self.mailboxes.write().await;
        if mailboxes.get(editor_id).is_some_and(|tx| tx.is_closed()) {
            mailboxes.remove(editor_id);
            return true;
        }
        false
    }

    pub async fn is_connected(&self, editor_id: &str) -> bool {
        self.mailboxes.read().await.contains_key(editor_id)
    }

    /// Members of a room, sorted.
    pub async fn room_members(&self, document_id: &str) -> Vec<EditorId> {
        let rooms = self.rooms.read().await;
        let mut members: Vec<EditorId> = rooms
            .get(document_id)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn stats(&self) -> HubStats {
        HubStats {
            events_sent: self.atomic_stats.events_sent.load(Ordering::Relaxed),
            events_dropped: self.atomic_stats.events_dropped.load(Ordering::Relaxed),
            connected_editors: self.mailboxes.read().await.len(),
            active_rooms: self.rooms.read().await.len(),
        }
    }

    fn deliver(
        &self,
        mailbox: &mpsc::Sender<Event>,
        editor_id: &str,
        event: Event,
    ) -> Result<(), TransportError> {
        match mailbox.try_send(event) {
            Ok(()) => {
                self.atomic_stats.events_sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.atomic_stats.events_dropped.fetch_add(1, Ordering::Relaxed);
                Err(TransportError::MailboxFull(editor_id.to_owned()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.atomic_stats.events_dropped.fetch_add(1, Ordering::Relaxed);
                Err(TransportError::Closed(editor_id.to_owned()))
            }
        }
    }
}

#[async_trait]
impl Transport for RoomHub {
    async fn join_room(&self, document_id: &str, editor_id: &str) {
        *self
            .rooms
            .write()
            .await
            .entry(document_id.to_owned())
            .or_default()
            .entry(editor_id.to_owned())
            .or_insert(0) += 1;
    }

    /// Undo one `join_room`. The editor stays a member while it has other
    /// sessions in the room.
    async fn leave_room(&self, document_id: &str, editor_id: &str) {
        let mut rooms = self.rooms.write().await;
        let Some(members) = rooms.get_mut(document_id) else {
            return;
        };
        if let Some(sessions) = members.get_mut(editor_id) {
            *sessions -= 1;
            if *sessions == 0 {
                members.remove(editor_id);
            }
        }
        if members.is_empty() {
            rooms.remove(document_id);
        }
    }

    async fn broadcast_to_room(
        &self,
        document_id: &str,
        event: &Event,
        exclude: Option<&str>,
    ) -> Result<usize, TransportError> {
        let rooms = self.rooms.read().await;
        let Some(members) = rooms.get(document_id) else {
            return Ok(0);
        };
        let mailboxes = self.mailboxes.read().await;

        let mut delivered = 0;
        for editor_id in members.keys() {
            if Some(editor_id.as_str()) == exclude {
                continue;
            }
            let Some(mailbox) = mailboxes.get(editor_id) else {
                log::debug!("Editor {editor_id} in room {document_id} has no mailbox");
                continue;
            };
            match self.deliver(mailbox, editor_id, event.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => log::warn!("Dropped {} for room {document_id}: {e}", event.name()),
            }
        }
        Ok(delivered)
    }

    async fn send_to_editor(&self, editor_id: &str, event: &Event) -> Result<(), TransportError> {
        let mailboxes = self.mailboxes.read().await;
        let mailbox = mailboxes
            .get(editor_id)
            .ok_or_else(|| TransportError::UnknownEditor(editor_id.to_owned()))?;
        self.deliver(mailbox, editor_id, event.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joined(editor: &str) -> Event {
        Event::EditorJoined {
            document_id: "doc".into(),
            editor_id: editor.into(),
        }
    }

    #[tokio::test]
    async fn test_join_and_leave_room() {
        let hub = RoomHub::new(8);
        hub.join_room("doc", "alice").await;
        hub.join_room("doc", "bob").await;
        assert_eq!(hub.room_members("doc").await, vec!["alice", "bob"]);

        hub.leave_room("doc", "alice").await;
        assert_eq!(hub.room_members("doc").await, vec!["bob"]);

        hub.leave_room("doc", "bob").await;
        assert_eq!(hub.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_member_stays_until_every_session_leaves() {
        let hub = RoomHub::new(8);
        hub.join_room("doc", "alice").await;
        hub.join_room("doc", "alice").await;
        hub.join_room("doc", "bob").await;

        hub.leave_room("doc", "alice").await;
        assert_eq!(hub.room_members("doc").await, vec!["alice", "bob"]);

        hub.leave_room("doc", "alice").await;
        assert_eq!(hub.room_members("doc").await, vec!["bob"]);

        hub.leave_room("doc", "alice").await;
        assert_eq!(hub.room_members("doc").await, vec!["bob"]);
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let hub = RoomHub::new(8);
        let mut alice = hub.connect("alice").await;
        let mut bob = hub.connect("bob").await;
        let mut carol = hub.connect("carol").await;
        for editor in ["alice", "bob", "carol"] {
            hub.join_room("doc", editor).await;
        }

        let delivered = hub
            .broadcast_to_room("doc", &joined("alice"), Some("alice"))
            .await
            .unwrap();
        assert_eq!(delivered, 2);
        assert_eq!(bob.try_recv().unwrap(), joined("alice"));
        assert_eq!(carol.try_recv().unwrap(), joined("alice"));
        assert!(alice.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rooms_are_isolated() {
        let hub = RoomHub::new(8);
        let mut alice = hub.connect("alice").await;
        let mut bob = hub.connect("bob").await;
        hub.join_room("doc-a", "alice").await;
        hub.join_room("doc-b", "bob").await;

        hub.broadcast_to_room("doc-a", &joined("x"), None).await.unwrap();
        assert!(alice.try_recv().is_ok());
        assert!(bob.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_mailbox_drops_and_counts() {
        let hub = RoomHub::new(2);
        let _slow = hub.connect("slow").await;
        hub.join_room("doc", "slow").await;

        for _ in 0..5 {
            hub.broadcast_to_room("doc", &joined("x"), None).await.unwrap();
        }

        let stats = hub.stats().await;
        assert_eq!(stats.events_sent, 2);
        assert_eq!(stats.events_dropped, 3);
    }

    #[tokio::test]
    async fn test_send_to_unknown_editor() {
        let hub = RoomHub::new(4);
        let err = hub.send_to_editor("ghost", &joined("x")).await.unwrap_err();
        assert_eq!(err, TransportError::UnknownEditor("ghost".into()));
    }

    #[tokio::test]
    async fn test_send_to_closed_mailbox() {
        let hub = RoomHub::new(4);
        drop(hub.connect("gone").await);
        let err = hub.send_to_editor("gone", &joined("x")).await.unwrap_err();
        assert_eq!(err, TransportError::Closed("gone".into()));
    }

    #[tokio::test]
    async fn test_disconnect_if_closed_keeps_newer_mailbox() {
        let hub = RoomHub::new(4);
        let old = hub.connect("alice").await;
        let new = hub.connect("alice").await;
        drop(old);
        assert!(!hub.disconnect_if_closed("alice").await);
        assert!(hub.is_connected("alice").await);

        drop(new);
        assert!(hub.disconnect_if_closed("alice").await);
        assert!(!hub.is_connected("alice").await);
    }

    #[tokio::test]
    async fn test_disconnect_clears_memberships() {
        let hub = RoomHub::new(4);
        let _rx = hub.connect("alice").await;
        hub.join_room("doc-a", "alice").await;
        hub.join_room("doc-b", "alice").await;

        hub.disconnect("alice").await;
        assert!(!hub.is_connected("alice").await);
        assert_eq!(hub.room_count().await, 0);
        assert_eq!(hub.stats().await.connected_editors, 0);
    }
}
