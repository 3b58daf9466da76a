//! Error types for `marquee-core`.
//!
//! [`ValidationError`] and [`UndoError`] are meant to be shown to users as
//! they are. Backends wrap both in their own error type and report its
//! category through [`Classify`].

use thiserror::Error;
use uuid::Uuid;

use crate::{
  audit::{BatchId, UndoReport},
  identity::IdentityKind,
};

/// Input rejected before anything was written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
  #[error("cannot merge an identity into itself")]
  SelfMerge,

  #[error("membership of {member} in {group} would create a cycle")]
  Cycle { member: Uuid, group: Uuid },

  #[error("name must not be empty")]
  EmptyName,

  #[error("identity {0} is not a group")]
  NotAGroup(Uuid),

  #[error("cannot merge a {source_kind} into a {target_kind}")]
  KindMismatch {
    source_kind: IdentityKind,
    target_kind: IdentityKind,
  },

  #[error("unknown credit role: {0:?}")]
  UnknownRole(String),

  #[error("table {table} has no writable field {field:?}")]
  UnknownField { table: String, field: String },

  #[error("alias {name:?} already belongs to identity {owner}")]
  AliasTaken { name: String, owner: Uuid },
}

/// A reversal that could not be carried out, or only partly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UndoError {
  /// Some steps were reverted and committed before one failed.
  #[error("partial undo of batch {}: {}", .0.batch_id, .0.summary())]
  Partial(UndoReport),

  #[error("there is no action left to undo")]
  NothingToUndo,

  #[error("batch {0} has already been undone")]
  AlreadyUndone(BatchId),

  #[error("batch {0} not found")]
  BatchNotFound(BatchId),

  #[error("batch {0} can no longer be undone: its deleted records were purged")]
  Purged(BatchId),
}

/// Decoding and configuration errors.
#[derive(Debug, Error)]
pub enum Error {
  #[error("missing field {0:?}")]
  MissingField(String),

  #[error("field {field:?} is not a valid {expected}")]
  FieldType { field: String, expected: &'static str },

  #[error("unknown identity kind: {0:?}")]
  UnknownKind(String),

  #[error("invalid configuration: {0}")]
  Config(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

// ─── Classification ──────────────────────────────────────────────────────────

/// Broad category of a backend error, used to decide how to surface it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  Validation,
  /// A uniqueness or foreign-key constraint rejected the write.
  Conflict,
  NotFound,
  Undo,
  Cancelled,
  Storage,
}

pub trait Classify {
  fn kind(&self) -> ErrorKind;

  /// Whether retrying the same call may succeed (e.g. lock contention).
  fn is_transient(&self) -> bool { false }
}
