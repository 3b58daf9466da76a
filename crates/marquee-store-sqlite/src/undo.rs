//! Batch reversal, batch listings and recycle-bin maintenance.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use marquee_core::{
  UndoError,
  audit::{
    Batch, BatchId, BatchKind, ChangeKind, ChangeLogEntry, DeletedRecordSnapshot, StepOutcome,
    UndoAction, UndoReport, UndoStep,
  },
  record::{FieldValue, Fields, TableSpec},
};
use rusqlite::{Connection, OptionalExtension as _, Transaction, params};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{BATCH_COLUMNS, RawBatch, RawSnapshot, SNAPSHOT_COLUMNS, encode_batch, encode_dt},
  repository,
};

// ─── Planning ────────────────────────────────────────────────────────────────

/// What one repository call of the batch did, and so what reverses it.
enum Change {
  Inserted(Vec<ChangeLogEntry>),
  Updated(Vec<ChangeLogEntry>),
  Deleted(DeletedRecordSnapshot),
}

struct Planned {
  seq:       i64,
  table:     String,
  record_id: Uuid,
  change:    Change,
}

impl Planned {
  fn action(&self) -> UndoAction {
    match &self.change {
      Change::Inserted(_) => UndoAction::RemoveInserted,
      Change::Updated(entries) => UndoAction::RevertFields {
        fields: entries.iter().map(|e| e.field.clone()).collect(),
      },
      Change::Deleted(snapshot) => UndoAction::RestoreDeleted { deleted_id: snapshot.deleted_id },
    }
  }
}

/// Every repository call of `batch`, latest first.
fn plan(conn: &Connection, batch: BatchId) -> Result<Vec<Planned>> {
  let mut calls: BTreeMap<i64, Vec<ChangeLogEntry>> = BTreeMap::new();
  for entry in repository::change_log_for_batch(conn, batch)? {
    calls.entry(entry.seq).or_default().push(entry);
  }

  let mut steps: Vec<Planned> = calls
    .into_iter()
    .filter_map(|(seq, entries)| {
      let first = entries.first()?;
      let (table, record_id, kind) = (first.table.clone(), first.record_id, first.kind);
      let change = match kind {
        ChangeKind::Insert => Change::Inserted(entries),
        ChangeKind::Update => Change::Updated(entries),
      };
      Some(Planned { seq, table, record_id, change })
    })
    .collect();

  steps.extend(
    repository::snapshots_for_batch(conn, batch)?
      .into_iter()
      .map(|s| Planned {
        seq:       s.seq,
        table:     s.table.clone(),
        record_id: s.record_id,
        change:    Change::Deleted(s),
      }),
  );

  steps.sort_by(|a, b| b.seq.cmp(&a.seq));
  Ok(steps)
}

// ─── Reversal ────────────────────────────────────────────────────────────────

fn table(name: &str) -> Result<&'static TableSpec> {
  TableSpec::by_name(name).ok_or_else(|| Error::Decode(format!("unknown audited table {name:?}")))
}

fn failed(reason: impl Into<String>) -> StepOutcome { StepOutcome::Failed { reason: reason.into() } }

fn current_value<'r>(row: &'r Fields, field: &str) -> &'r FieldValue {
  row.get(field).unwrap_or(&FieldValue::Null)
}

/// Reverse one step, writing under `undo_batch`. Conflicts with later
/// batches come back as [`StepOutcome::Failed`]; errors abort the step too.
fn reverse(conn: &Connection, step: &Planned, undo_batch: BatchId) -> Result<StepOutcome> {
  let spec = table(&step.table)?;

  match &step.change {
    Change::Updated(entries) => {
      let Some(row) = repository::fetch_row(conn, spec, step.record_id)? else {
        return Ok(failed("record was deleted by a later action"));
      };

      let mut revert = Fields::new();
      for entry in entries {
        let current = current_value(&row, &entry.field);
        if *current == entry.new_value {
          revert.set(&entry.field, entry.old_value.clone());
        } else if *current != entry.old_value {
          return Ok(failed(format!(
            "field {} was changed by a later action",
            entry.field
          )));
        }
      }

      if revert.is_empty() {
        return Ok(StepOutcome::AlreadyReverted);
      }
      repository::update_row(conn, spec, step.record_id, &revert, undo_batch)?;
      Ok(StepOutcome::Applied)
    }

    Change::Inserted(entries) => {
      let Some(row) = repository::fetch_row(conn, spec, step.record_id)? else {
        return Ok(StepOutcome::AlreadyReverted);
      };
      if let Some(entry) = entries
        .iter()
        .find(|e| *current_value(&row, &e.field) != e.new_value)
      {
        return Ok(failed(format!(
          "field {} was changed by a later action",
          entry.field
        )));
      }
      repository::delete_row(conn, spec, step.record_id, undo_batch)?;
      Ok(StepOutcome::Applied)
    }

    Change::Deleted(snapshot) => {
      if snapshot.restored_at.is_some() {
        return Ok(StepOutcome::AlreadyReverted);
      }
      if repository::fetch_row(conn, spec, step.record_id)?.is_some() {
        return Ok(failed("a record with the same key exists again"));
      }
      repository::restore_row(conn, snapshot.deleted_id, undo_batch)?;
      Ok(StepOutcome::Applied)
    }
  }
}

/// Reverse every step of `batch`, latest first, each inside its own
/// savepoint. The first step that cannot be reversed stops the run; steps
/// applied before it stay applied. The returned report is incomplete in
/// that case, and the caller commits it and reports a partial undo.
pub fn undo_batch(
  tx: &mut Transaction<'_>,
  batch: BatchId,
  undo_id: BatchId,
) -> Result<UndoReport> {
  let record = get_batch(tx, batch)?.ok_or(UndoError::BatchNotFound(batch))?;
  if record.undone_at.is_some() {
    return Err(UndoError::AlreadyUndone(batch).into());
  }
  if record.purged_at.is_some() {
    return Err(UndoError::Purged(batch).into());
  }

  let steps = plan(tx, batch)?;
  let mut report = UndoReport { batch_id: batch, undo_batch_id: undo_id, steps: Vec::new() };

  for step in &steps {
    let savepoint = tx.savepoint()?;
    let outcome = reverse(&savepoint, step, undo_id).unwrap_or_else(|e| failed(e.to_string()));
    let stop = matches!(outcome, StepOutcome::Failed { .. });
    if stop {
      // Dropping the savepoint rolls the step back.
      drop(savepoint);
      warn!(
        %batch,
        seq = step.seq,
        table = %step.table,
        record = %step.record_id,
        ?outcome,
        "undo step failed"
      );
    } else {
      savepoint.commit()?;
      debug!(%batch, seq = step.seq, table = %step.table, ?outcome, "undo step");
    }

    report.steps.push(UndoStep {
      seq:       step.seq,
      table:     step.table.clone(),
      record_id: step.record_id,
      action:    step.action(),
      outcome,
    });
    if stop {
      break;
    }
  }

  // The undo batch row exists only if some step wrote through it.
  repository::mark_undo_batch(tx, undo_id, &format!("undo {batch}"))?;

  if report.is_complete() {
    tx.execute(
      "UPDATE batches SET undone_at = ?1, undone_by = ?2 WHERE batch_id = ?3",
      params![encode_dt(Utc::now()), encode_batch(undo_id), encode_batch(batch)],
    )?;
    if record.kind == BatchKind::Undo {
      // Redo: the batch this undo reversed is live again.
      tx.execute(
        "UPDATE batches SET undone_at = NULL, undone_by = NULL WHERE undone_by = ?1",
        params![encode_batch(batch)],
      )?;
    }
  }
  Ok(report)
}

// ─── Batches ─────────────────────────────────────────────────────────────────

pub fn get_batch(conn: &Connection, batch: BatchId) -> Result<Option<Batch>> {
  let sql = format!("SELECT {BATCH_COLUMNS} FROM batches WHERE batch_id = ?1");
  conn
    .query_row(&sql, params![encode_batch(batch)], RawBatch::from_row)
    .optional()?
    .map(RawBatch::into_batch)
    .transpose()
}

/// Most recent user action that is neither undone nor purged.
pub fn last_undoable(conn: &Connection) -> Result<Option<BatchId>> {
  let sql = format!(
    "SELECT {BATCH_COLUMNS} FROM batches
     WHERE kind = ?1 AND undone_at IS NULL AND purged_at IS NULL
     ORDER BY rowid DESC LIMIT 1"
  );
  conn
    .query_row(&sql, params![BatchKind::Action.to_string()], RawBatch::from_row)
    .optional()?
    .map(|raw| raw.into_batch().map(|b| b.batch_id))
    .transpose()
}

/// Newest first.
pub fn list_batches(conn: &Connection, limit: usize) -> Result<Vec<Batch>> {
  let sql = format!("SELECT {BATCH_COLUMNS} FROM batches ORDER BY rowid DESC LIMIT ?1");
  let limit = i64::try_from(limit).unwrap_or(i64::MAX);
  let mut stmt = conn.prepare(&sql)?;
  let raws = stmt
    .query_map(params![limit], RawBatch::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raws.into_iter().map(RawBatch::into_batch).collect()
}

// ─── Recycle bin ─────────────────────────────────────────────────────────────

pub fn list_deleted(conn: &Connection, include_restored: bool) -> Result<Vec<DeletedRecordSnapshot>> {
  let filter = if include_restored { "" } else { "WHERE restored_at IS NULL" };
  let sql = format!("SELECT {SNAPSHOT_COLUMNS} FROM deleted_records {filter} ORDER BY deleted_id DESC");
  let mut stmt = conn.prepare(&sql)?;
  let raws = stmt
    .query_map([], RawSnapshot::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raws.into_iter().map(RawSnapshot::into_snapshot).collect()
}

/// Drop snapshots taken at or before `older_than` (all when `None`).
///
/// A batch that loses an unrestored snapshot could no longer be reversed in
/// full, so it is stamped as purged first.
pub fn purge(conn: &Connection, older_than: Option<DateTime<Utc>>) -> Result<usize> {
  let cutoff = older_than.map(encode_dt);
  let now = encode_dt(Utc::now());

  conn.execute(
    "UPDATE batches SET purged_at = ?1
     WHERE purged_at IS NULL AND batch_id IN (
       SELECT batch_id FROM deleted_records
       WHERE restored_at IS NULL AND (?2 IS NULL OR deleted_at <= ?2)
     )",
    params![now, cutoff],
  )?;
  let removed = conn.execute(
    "DELETE FROM deleted_records WHERE ?1 IS NULL OR deleted_at <= ?1",
    params![cutoff],
  )?;
  Ok(removed)
}
