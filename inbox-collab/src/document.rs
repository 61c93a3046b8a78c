//! Authoritative in-memory state of one document.
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ DocumentState                                 │
//! │   text ── version ── active editors           │
//! │                                               │
//! │   OperationLog                                │
//! │   compacted ◄── op v+1 ◄── op v+2 ◄── … head  │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! Each committed operation is logged in its applied form so that a late
//! submission authored against version `b` can be rewritten against the
//! operations `b+1..=version`. Entries nobody can still be behind are
//! compacted away.

use std::collections::{BTreeMap, VecDeque};

use inbox_ot::Operation;
use uuid::Uuid;

use crate::protocol::{DocumentId, EditorId, Event};

/// Identifies one session of an editor. An editor id may be joined from
/// several sessions at once.
pub type SessionId = Uuid;

/// One committed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedOperation {
    /// Version the document reached by applying this operation
    pub version: u64,
    pub editor_id: EditorId,
    pub operation: Operation,
}

/// Statistics for an operation log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogStats {
    pub retained: usize,
    /// Versions at or below this were compacted away
    pub compacted_through: u64,
    pub head_version: u64,
    /// Total entries removed by compaction
    pub compacted_total: u64,
}

/// Ordered log of committed operations with prefix compaction.
#[derive(Debug, Clone)]
pub struct OperationLog {
    /// Versions `compacted_through + 1 ..= head`, contiguous
    entries: VecDeque<LoggedOperation>,
    compacted_through: u64,
    compacted_total: u64,
    compaction_threshold: usize,
}

impl OperationLog {
    /// Empty log for a document loaded at `version`.
    pub fn new(version: u64, compaction_threshold: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            compacted_through: version,
            compacted_total: 0,
            compaction_threshold: compaction_threshold.max(1),
        }
    }

    pub fn head_version(&self) -> u64 {
        self.compacted_through + self.entries.len() as u64
    }

    pub fn compacted_through(&self) -> u64 {
        self.compacted_through
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append the operation that produced the next version.
    pub fn push(&mut self, editor_id: EditorId, operation: Operation) -> u64 {
        let version = self.head_version() + 1;
        self.entries.push_back(LoggedOperation {
            version,
            editor_id,
            operation,
        });
        version
    }

    /// Operations committed after `base`, oldest first.
    ///
    /// `None` when `base` is ahead of the head or its successors were
    /// compacted away.
    pub fn since(&self, base: u64) -> Option<impl Iterator<Item = &LoggedOperation>> {
        if base < self.compacted_through || base > self.head_version() {
            return None;
        }
        let skip = (base - self.compacted_through) as usize;
        Some(self.entries.range(skip..))
    }

    pub fn needs_compaction(&self) -> bool {
        self.entries.len() >= self.compaction_threshold
    }

    /// Drop entries up to and including `version`. Returns how many went.
    pub fn compact_through(&mut self, version: u64) -> usize {
        let mut removed = 0;
        while self.entries.front().is_some_and(|e| e.version <= version) {
            self.entries.pop_front();
            removed += 1;
        }
        self.compacted_through += removed as u64;
        self.compacted_total += removed as u64;
        removed
    }

    pub fn stats(&self) -> LogStats {
        LogStats {
            retained: self.entries.len(),
            compacted_through: self.compacted_through,
            head_version: self.head_version(),
            compacted_total: self.compacted_total,
        }
    }
}

/// Point-in-time view of a document, as sent to editors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSnapshot {
    pub document_id: DocumentId,
    pub text: String,
    pub version: u64,
    pub active_editors: Vec<EditorId>,
}

impl DocumentSnapshot {
    pub fn into_event(self) -> Event {
        Event::DocumentState {
            document_id: self.document_id,
            text: self.text,
            version: self.version,
            active_editors: self.active_editors,
        }
    }
}

/// Committed text, version and editor set of one loaded document.
#[derive(Debug)]
pub struct DocumentState {
    document_id: DocumentId,
    text: String,
    version: u64,
    /// Editor → session → lowest version that session may still submit
    /// against. An editor is active while it has at least one session.
    editors: BTreeMap<EditorId, BTreeMap<SessionId, u64>>,
    log: OperationLog,
}

impl DocumentState {
    /// Fresh state at version 0 from persisted (or empty) text.
    pub fn new(document_id: impl Into<DocumentId>, text: String, compaction_threshold: usize) -> Self {
        Self {
            document_id: document_id.into(),
            text,
            version: 0,
            editors: BTreeMap::new(),
            log: OperationLog::new(0, compaction_threshold),
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Active editors in id order.
    pub fn active_editors(&self) -> Vec<EditorId> {
        self.editors.keys().cloned().collect()
    }

    pub fn editor_count(&self) -> usize {
        self.editors.len()
    }

    pub fn has_editors(&self) -> bool {
        !self.editors.is_empty()
    }

    pub fn is_active(&self, editor_id: &str) -> bool {
        self.editors.contains_key(editor_id)
    }

    pub fn has_session(&self, editor_id: &str, session_id: SessionId) -> bool {
        self.editors
            .get(editor_id)
            .is_some_and(|sessions| sessions.contains_key(&session_id))
    }

    /// Add a session of `editor_id` that has just seen the current version.
    /// Returns `true` if the editor was not active before.
    pub fn add_editor(&mut self, editor_id: &str, session_id: SessionId) -> bool {
        let version = self.version;
        let sessions = self.editors.entry(editor_id.to_owned()).or_default();
        let newly_active = sessions.is_empty();
        sessions.insert(session_id, version);
        newly_active
    }

    /// Remove one session of `editor_id`. Returns `true` if that was the
    /// editor's last session. Unknown sessions are ignored.
    pub fn remove_editor(&mut self, editor_id: &str, session_id: SessionId) -> bool {
        let Some(sessions) = self.editors.get_mut(editor_id) else {
            return false;
        };
        if sessions.remove(&session_id).is_none() || !sessions.is_empty() {
            return false;
        }
        self.editors.remove(editor_id);
        true
    }

    /// Record that this session will not submit against anything older
    /// than `version`.
    pub fn mark_seen(&mut self, editor_id: &str, session_id: SessionId, version: u64) {
        if let Some(known) = self
            .editors
            .get_mut(editor_id)
            .and_then(|sessions| sessions.get_mut(&session_id))
        {
            *known = (*known).max(version);
        }
    }

    /// Operations committed after `base`, or `None` if unavailable.
    pub fn operations_since(&self, base: u64) -> Option<impl Iterator<Item = &Operation>> {
        self.log.since(base).map(|entries| entries.map(|e| &e.operation))
    }

    /// Commit an already-applied operation together with the text it
    /// produced. Returns the new version.
    pub fn commit(&mut self, editor_id: &str, operation: Operation, text: String) -> u64 {
        self.text = text;
        self.version = self.log.push(editor_id.to_owned(), operation);
        self.compact_log();
        self.version
    }

    /// Compact the log below the oldest version any editor may still use.
    fn compact_log(&mut self) {
        if !self.log.needs_compaction() {
            return;
        }
        let floor = self
            .editors
            .values()
            .flat_map(|sessions| sessions.values().copied())
            .min()
            .unwrap_or(self.version);
        let removed = self.log.compact_through(floor);
        if removed > 0 {
            log::debug!(
                "Compacted {removed} log entries for {} (through v{floor})",
                self.document_id
            );
        }
    }

    pub fn log_stats(&self) -> LogStats {
        self.log.stats()
    }

    pub fn snapshot(&self) -> DocumentSnapshot {
        DocumentSnapshot {
            document_id: self.document_id.clone(),
            text: self.text.clone(),
            version: self.version,
            active_editors: self.active_editors(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ins(position: usize, s: &str) -> Operation {
        Operation::insert(position, s)
    }

    fn sid() -> SessionId {
        Uuid::new_v4()
    }

    #[test]
    fn test_log_push_and_since() {
        let mut log = OperationLog::new(0, 100);
        assert_eq!(log.push("a".into(), ins(0, "x")), 1);
        assert_eq!(log.push("b".into(), ins(1, "y")), 2);
        assert_eq!(log.push("a".into(), ins(2, "z")), 3);

        let versions: Vec<u64> = log.since(1).unwrap().map(|e| e.version).collect();
        assert_eq!(versions, vec![2, 3]);
        assert_eq!(log.since(3).unwrap().count(), 0);
        assert!(log.since(4).is_none());
    }

    #[test]
    fn test_log_compaction() {
        let mut log = OperationLog::new(0, 3);
        for i in 0..5 {
            log.push("a".into(), ins(i, "k"));
        }
        assert!(log.needs_compaction());

        assert_eq!(log.compact_through(3), 3);
        assert_eq!(log.len(), 2);
        assert_eq!(log.head_version(), 5);
        assert!(log.since(2).is_none());
        assert_eq!(log.since(3).unwrap().count(), 2);

        let stats = log.stats();
        assert_eq!(stats.compacted_through, 3);
        assert_eq!(stats.compacted_total, 3);
    }

    #[test]
    fn test_state_commit_advances_version() {
        let mut doc = DocumentState::new("ticket-1", "hello".into(), 100);
        doc.add_editor("alice", sid());

        let version = doc.commit("alice", ins(5, " world"), "hello world".into());
        assert_eq!(version, 1);
        assert_eq!(doc.version(), 1);
        assert_eq!(doc.text(), "hello world");

        let ops: Vec<&Operation> = doc.operations_since(0).unwrap().collect();
        assert_eq!(ops, vec![&ins(5, " world")]);
    }

    #[test]
    fn test_compaction_keeps_entries_for_slowest_editor() {
        let mut doc = DocumentState::new("d", String::new(), 4);
        let (slow, fast) = (sid(), sid());
        doc.add_editor("slow", slow);
        doc.add_editor("fast", fast);

        let mut text = String::new();
        for i in 0..6 {
            text.push('k');
            doc.commit("fast", ins(i, "k"), text.clone());
            let version = doc.version();
            doc.mark_seen("fast", fast, version);
        }
        // "slow" joined at v0 and may still submit against it.
        assert!(doc.operations_since(0).is_some());
        assert_eq!(doc.log_stats().compacted_total, 0);

        doc.mark_seen("slow", slow, 5);
        text.push('k');
        doc.commit("fast", ins(6, "k"), text);
        assert!(doc.operations_since(4).is_none());
        assert_eq!(doc.operations_since(5).unwrap().count(), 2);
    }

    #[test]
    fn test_editor_membership() {
        let mut doc = DocumentState::new("d", String::new(), 8);
        let (bob, alice) = (sid(), sid());
        assert!(doc.add_editor("bob", bob));
        assert!(doc.add_editor("alice", alice));
        assert_eq!(doc.active_editors(), vec!["alice", "bob"]);

        assert!(doc.remove_editor("bob", bob));
        assert!(!doc.remove_editor("bob", bob));
        assert_eq!(doc.editor_count(), 1);
        assert!(doc.has_editors());
    }

    #[test]
    fn test_editor_with_two_sessions_stays_active() {
        let mut doc = DocumentState::new("d", String::new(), 8);
        let (first, second) = (sid(), sid());
        assert!(doc.add_editor("alice", first));
        assert!(!doc.add_editor("alice", second));
        assert_eq!(doc.editor_count(), 1);

        assert!(!doc.remove_editor("alice", first));
        assert!(doc.is_active("alice"));
        assert!(!doc.has_session("alice", first));
        assert!(doc.has_session("alice", second));

        // A session that already left changes nothing.
        assert!(!doc.remove_editor("alice", first));
        assert!(doc.has_session("alice", second));

        assert!(doc.remove_editor("alice", second));
        assert!(!doc.has_editors());
    }

    #[test]
    fn test_compaction_floor_covers_every_session() {
        let mut doc = DocumentState::new("d", String::new(), 2);
        let (old, new) = (sid(), sid());
        doc.add_editor("alice", old);
        doc.add_editor("alice", new);

        let mut text = String::new();
        for i in 0..4 {
            text.push('k');
            doc.commit("alice", ins(i, "k"), text.clone());
            let version = doc.version();
            doc.mark_seen("alice", new, version);
        }
        // The older session is still at v0.
        assert!(doc.operations_since(0).is_some());
    }

    #[test]
    fn test_snapshot_event() {
        let mut doc = DocumentState::new("d", "abc".into(), 8);
        doc.add_editor("alice", sid());
        let event = doc.snapshot().into_event();
        assert_eq!(
            event,
            Event::DocumentState {
                document_id: "d".into(),
                text: "abc".into(),
                version: 0,
                active_editors: vec!["alice".into()],
            }
        );
    }
}
