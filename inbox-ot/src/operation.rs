//! Linear character operations.
//!
//! Positions and lengths count Unicode scalar values (`char`), never bytes,
//! so a client working in characters and the server agree on offsets
//! regardless of encoding width.

use serde::{Deserialize, Serialize};

/// A single edit primitive against a text buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Insert `content` before the character at `position`.
    Insert { position: usize, content: String },
    /// Remove `length` characters starting at `position`.
    Delete { position: usize, length: usize },
    /// Remove `length` characters at `position` and put `content` in their place.
    Replace {
        position: usize,
        length: usize,
        content: String,
    },
}

/// Discriminant of an [`Operation`], used in logs and error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Insert,
    Delete,
    Replace,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Insert => write!(f, "insert"),
            Self::Delete => write!(f, "delete"),
            Self::Replace => write!(f, "replace"),
        }
    }
}

impl Operation {
    pub fn insert(position: usize, content: impl Into<String>) -> Self {
        Self::Insert {
            position,
            content: content.into(),
        }
    }

    pub fn delete(position: usize, length: usize) -> Self {
        Self::Delete { position, length }
    }

    pub fn replace(position: usize, length: usize, content: impl Into<String>) -> Self {
        Self::Replace {
            position,
            length,
            content: content.into(),
        }
    }

    /// Build the narrowest operation for a splice.
    ///
    /// A splice that removes nothing is an `Insert`, one that inserts nothing
    /// is a `Delete` (possibly of length zero, which is a no-op).
    pub fn from_splice(position: usize, length: usize, content: String) -> Self {
        match (length, content.is_empty()) {
            (_, true) => Self::Delete { position, length },
            (0, false) => Self::Insert { position, content },
            _ => Self::Replace {
                position,
                length,
                content,
            },
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Insert { .. } => OperationKind::Insert,
            Self::Delete { .. } => OperationKind::Delete,
            Self::Replace { .. } => OperationKind::Replace,
        }
    }

    pub fn position(&self) -> usize {
        match self {
            Self::Insert { position, .. }
            | Self::Delete { position, .. }
            | Self::Replace { position, .. } => *position,
        }
    }

    /// Number of characters removed (zero for inserts).
    pub fn length(&self) -> usize {
        match self {
            Self::Insert { .. } => 0,
            Self::Delete { length, .. } | Self::Replace { length, .. } => *length,
        }
    }

    /// Inserted payload (`None` for deletes).
    pub fn content(&self) -> Option<&str> {
        match self {
            Self::Insert { content, .. } | Self::Replace { content, .. } => Some(content),
            Self::Delete { .. } => None,
        }
    }

    /// Number of characters inserted.
    pub fn inserted_len(&self) -> usize {
        self.content().map_or(0, char_len)
    }

    /// Whether applying this operation leaves any buffer unchanged.
    pub fn is_noop(&self) -> bool {
        match self {
            Self::Insert { content, .. } => content.is_empty(),
            Self::Delete { length, .. } => *length == 0,
            Self::Replace { .. } => false,
        }
    }

    /// Net change in character count once applied.
    pub fn len_delta(&self) -> isize {
        self.inserted_len() as isize - self.length() as isize
    }
}

/// Character count of `s`.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Byte offset of the character at `char_pos`, or `None` past the end.
///
/// `char_pos == char_len(s)` maps to `s.len()`.
pub(crate) fn byte_offset(s: &str, char_pos: usize) -> Option<usize> {
    if char_pos == 0 {
        return Some(0);
    }
    let mut seen = 0;
    for (idx, _) in s.char_indices() {
        if seen == char_pos {
            return Some(idx);
        }
        seen += 1;
    }
    (seen == char_pos).then_some(s.len())
}
