//! # inbox-ot — Operational transform core for shared inbox documents
//!
//! Notes, message drafts and templates are edited as plain character
//! buffers. Clients submit single [`Operation`]s against the version they
//! last saw; operations that raced with others are rewritten with
//! [`transform`] before [`apply`] runs them.
//!
//! ## Modules
//!
//! - [`operation`] — `Insert` / `Delete` / `Replace` edit primitives
//! - [`apply`] — applying an operation to a buffer, with strict bounds
//! - [`transform`] — rewriting concurrent operations so replicas converge

pub mod apply;
pub mod operation;
pub mod transform;

pub use apply::{apply, apply_all, OtError};
pub use operation::{char_len, Operation, OperationKind};
pub use transform::{transform, transform_against_sequence, transform_pair, transform_with, Bias};
