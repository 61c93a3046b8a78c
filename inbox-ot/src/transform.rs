//! Operational transform for linear character operations.
//!
//! Every operation is handled as a splice `(position, removed, inserted)`:
//! an insert removes nothing, a delete inserts nothing, a replace does both.
//! Transforming `op` against `against` yields an operation with the same
//! intent as `op` that is valid on a buffer `against` has already been
//! applied to.
//!
//! ```text
//!   x ──against──► x·b
//!   │               │
//!   op          op' = transform(op, against)
//!   ▼               ▼
//!  x·a ──against'─► x·b·op' == x·a·against'
//! ```
//!
//! Cases:
//! - disjoint ranges: the later one shifts by the other's length change;
//! - inserts at the same position: resolved by [`Bias`];
//! - overlapping ranges: both end as one splice over the union of the
//!   removed ranges, with both inserted contents kept in bias order, so a
//!   concurrent insert inside a deleted range survives.

use crate::operation::{char_len, Operation};

/// Which side of a concurrent operation `op` lands on when they collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Bias {
    /// `op`'s content goes before the other operation's content.
    Before,
    /// `op`'s content goes after: the other operation wins the position.
    #[default]
    After,
}

impl Bias {
    pub fn flip(self) -> Self {
        match self {
            Self::Before => Self::After,
            Self::After => Self::Before,
        }
    }
}

/// Borrowed splice view of an operation.
#[derive(Debug, Clone, Copy)]
struct Splice<'a> {
    position: usize,
    length: usize,
    content: &'a str,
    inserted: usize,
}

impl<'a> Splice<'a> {
    fn of(op: &'a Operation) -> Self {
        let content = op.content().unwrap_or("");
        Self {
            position: op.position(),
            length: op.length(),
            content,
            inserted: char_len(content),
        }
    }

    fn end(&self) -> usize {
        self.position.saturating_add(self.length)
    }

    /// Pure insertion point (no characters removed).
    fn is_point(&self) -> bool {
        self.length == 0
    }

    /// `self` ends at or before `other` starts and the two never interact.
    fn precedes(&self, other: &Splice<'_>) -> bool {
        self.end() <= other.position
            && !(self.is_point() && other.is_point() && self.position == other.position)
    }
}

/// Transform `op` against an already-committed `against`.
///
/// Ties go to the committed operation: an insert arriving later at the same
/// position is shifted right.
pub fn transform(op: &Operation, against: &Operation) -> Operation {
    transform_with(op, against, Bias::After)
}

/// Transform `op` against `against` with an explicit tie-break.
///
/// `transform_with(b, a, bias)` and `transform_with(a, b, bias.flip())`
/// converge: applying `a` then the first gives the same text as applying
/// `b` then the second.
pub fn transform_with(op: &Operation, against: &Operation, bias: Bias) -> Operation {
    let a = Splice::of(op);
    let b = Splice::of(against);
    // Saturating: a position past the end stays past the end and fails in
    // `apply` instead of wrapping into range.
    let shift = |s: Splice<'_>| {
        Operation::from_splice(
            s.position.saturating_sub(b.length).saturating_add(b.inserted),
            s.length,
            s.content.to_owned(),
        )
    };

    if a.precedes(&b) {
        return op.clone();
    }
    if b.precedes(&a) {
        return shift(a);
    }
    if a.is_point() && b.is_point() {
        // Same insertion point.
        return match bias {
            Bias::Before => op.clone(),
            Bias::After => shift(a),
        };
    }

    // Overlap: the result covers the union of both removed ranges.
    let lo = a.position.min(b.position);
    let hi = a.end().max(b.end());
    let a_first = bias == Bias::Before;

    // Skip rewriting `against`'s content when it already sits where the
    // merged result needs it.
    let content_after_b = !a_first || a.content.is_empty();
    let content_before_b = a_first || a.content.is_empty();
    if content_after_b && a.position >= b.position {
        return Operation::from_splice(
            b.position.saturating_add(b.inserted),
            hi.saturating_sub(b.end()),
            a.content.to_owned(),
        );
    }
    if content_before_b && a.end() <= b.end() {
        return Operation::from_splice(lo, b.position.saturating_sub(lo), a.content.to_owned());
    }

    let content = if a_first {
        [a.content, b.content].concat()
    } else {
        [b.content, a.content].concat()
    };
    let length = hi
        .saturating_sub(b.length)
        .saturating_add(b.inserted)
        .saturating_sub(lo);
    Operation::from_splice(lo, length, content)
}

/// Walk `op` forward across `ops`, in the order they were committed.
pub fn transform_against_sequence<'a, I>(op: &Operation, ops: I) -> Operation
where
    I: IntoIterator<Item = &'a Operation>,
{
    ops.into_iter().fold(op.clone(), |acc, committed| {
        let next = transform(&acc, committed);
        if next != acc {
            log::trace!("Rewrote {acc:?} to {next:?} against {committed:?}");
        }
        next
    })
}

/// Transform two concurrent operations against each other.
///
/// Returns `(incoming', committed')`: `incoming'` applies after `committed`,
/// `committed'` applies after `incoming`. The committed side wins ties in
/// both directions, matching what [`transform`] does on the server.
pub fn transform_pair(incoming: &Operation, committed: &Operation) -> (Operation, Operation) {
    (
        transform_with(incoming, committed, Bias::After),
        transform_with(committed, incoming, Bias::Before),
    )
}
