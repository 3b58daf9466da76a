//! Audit records: batches, the field-level change log, recycle-bin snapshots
//! and undo reports.
//!
//! The change log and the recycle bin are append-only. Only a snapshot's
//! `restored_at` stamp and a batch's undo/purge stamps are ever written
//! after creation.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::record::{FieldValue, Fields};

// ─── Batches ─────────────────────────────────────────────────────────────────

/// Correlation token shared by every audit record one logical user action
/// produces.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BatchId(pub Uuid);

impl BatchId {
  /// Allocate a fresh batch id. Nothing is persisted until the first write
  /// made under it commits.
  pub fn new() -> Self { Self(Uuid::new_v4()) }
}

impl Default for BatchId {
  fn default() -> Self { Self::new() }
}

impl fmt::Display for BatchId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.0.fmt(f) }
}

/// Whether a batch records a user action or the reversal of one.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BatchKind {
  Action,
  Undo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
  pub batch_id:   BatchId,
  pub kind:       BatchKind,
  /// Short description of the action, e.g. `merge`.
  pub label:      Option<String>,
  pub created_at: DateTime<Utc>,
  pub undone_at:  Option<DateTime<Utc>>,
  /// The undo batch that reversed this one.
  pub undone_by:  Option<BatchId>,
  /// Set once recycle-bin snapshots of this batch have been purged; such a
  /// batch can no longer be undone.
  pub purged_at:  Option<DateTime<Utc>>,
}

// ─── Change log ──────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChangeKind {
  Insert,
  Update,
}

/// One field-level mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
  pub entry_id:    i64,
  /// Audit sequence number of the repository call that produced this entry.
  /// Entries from one call share it; it orders calls across the change log
  /// and the recycle bin.
  pub seq:         i64,
  pub batch_id:    BatchId,
  pub table:       String,
  pub record_id:   Uuid,
  pub field:       String,
  pub kind:        ChangeKind,
  pub old_value:   FieldValue,
  pub new_value:   FieldValue,
  pub recorded_at: DateTime<Utc>,
}

// ─── Recycle bin ─────────────────────────────────────────────────────────────

/// A full copy of a row taken at the moment it was deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedRecordSnapshot {
  pub deleted_id:  i64,
  pub seq:         i64,
  pub batch_id:    BatchId,
  pub table:       String,
  pub record_id:   Uuid,
  pub row:         Fields,
  pub deleted_at:  DateTime<Utc>,
  pub restored_at: Option<DateTime<Utc>>,
}

// ─── Undo ────────────────────────────────────────────────────────────────────

/// The reversal applied for one repository call of the undone batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum UndoAction {
  /// Write the logged old values of these fields back.
  RevertFields { fields: Vec<String> },
  /// Soft-delete a row the batch inserted.
  RemoveInserted,
  /// Re-insert a row the batch deleted.
  RestoreDeleted { deleted_id: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
  Applied,
  /// The record was already in its pre-batch state.
  AlreadyReverted,
  Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoStep {
  pub seq:       i64,
  pub table:     String,
  pub record_id: Uuid,
  pub action:    UndoAction,
  pub outcome:   StepOutcome,
}

/// Step-by-step account of an undo, in the order the steps were attempted
/// (reverse chronological).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoReport {
  pub batch_id:      BatchId,
  /// The batch the reversal itself was recorded under.
  pub undo_batch_id: BatchId,
  pub steps:         Vec<UndoStep>,
}

impl UndoReport {
  pub fn failed_step(&self) -> Option<&UndoStep> {
    self
      .steps
      .iter()
      .find(|s| matches!(s.outcome, StepOutcome::Failed { .. }))
  }

  pub fn is_complete(&self) -> bool { self.failed_step().is_none() }

  /// Steps that changed data.
  pub fn applied(&self) -> impl Iterator<Item = &UndoStep> {
    self
      .steps
      .iter()
      .filter(|s| s.outcome == StepOutcome::Applied)
  }

  /// One-line summary for error messages and logs.
  pub fn summary(&self) -> String {
    match self.failed_step() {
      Some(step) => {
        let reason = match &step.outcome {
          StepOutcome::Failed { reason } => reason.as_str(),
          _ => "",
        };
        format!(
          "{} step(s) applied before {} {} could not be reverted: {reason}",
          self.applied().count(),
          step.table,
          step.record_id,
        )
      }
      None => format!("{} step(s) applied", self.applied().count()),
    }
  }
}
