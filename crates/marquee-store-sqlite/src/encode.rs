//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as RFC 3339 strings. UUIDs are stored as
//! hyphenated lowercase strings. Change-log values and recycle-bin rows are
//! stored as compact JSON.

use chrono::{DateTime, Utc};
use marquee_core::{
  audit::{Batch, BatchId, BatchKind, ChangeKind, ChangeLogEntry, DeletedRecordSnapshot},
  record::{FieldValue, Fields},
};
use rusqlite::types::Value;
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn encode_batch(id: BatchId) -> String { encode_uuid(id.0) }

pub fn decode_batch(s: &str) -> Result<BatchId> { decode_uuid(s).map(BatchId) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

// ─── Column values ───────────────────────────────────────────────────────────

pub fn to_sql(value: &FieldValue) -> Value {
  match value {
    FieldValue::Null => Value::Null,
    FieldValue::Integer(n) => Value::Integer(*n),
    FieldValue::Text(s) => Value::Text(s.clone()),
  }
}

pub fn from_sql(value: Value) -> Result<FieldValue> {
  match value {
    Value::Null => Ok(FieldValue::Null),
    Value::Integer(n) => Ok(FieldValue::Integer(n)),
    Value::Text(s) => Ok(FieldValue::Text(s)),
    Value::Real(_) | Value::Blob(_) => {
      Err(Error::Decode("unsupported column type".into()))
    }
  }
}

/// JSON form used by the `old_value`/`new_value` change-log columns.
pub fn encode_value(value: &FieldValue) -> Result<String> { Ok(serde_json::to_string(value)?) }

pub fn decode_value(s: &str) -> Result<FieldValue> { Ok(serde_json::from_str(s)?) }

pub fn encode_row(row: &Fields) -> Result<String> { Ok(serde_json::to_string(row)?) }

pub fn decode_row(s: &str) -> Result<Fields> { Ok(serde_json::from_str(s)?) }

// ─── Enums ───────────────────────────────────────────────────────────────────

pub fn decode_batch_kind(s: &str) -> Result<BatchKind> {
  s.parse()
    .map_err(|_| Error::Decode(format!("unknown batch kind: {s:?}")))
}

pub fn decode_change_kind(s: &str) -> Result<ChangeKind> {
  s.parse()
    .map_err(|_| Error::Decode(format!("unknown change kind: {s:?}")))
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from a `change_log` row.
pub struct RawChangeLogEntry {
  pub entry_id:    i64,
  pub seq:         i64,
  pub batch_id:    String,
  pub table_name:  String,
  pub record_id:   String,
  pub field:       String,
  pub change_kind: String,
  pub old_value:   String,
  pub new_value:   String,
  pub recorded_at: String,
}

pub const CHANGE_LOG_COLUMNS: &str = "entry_id, seq, batch_id, table_name, record_id, field, \
                                      change_kind, old_value, new_value, recorded_at";

impl RawChangeLogEntry {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      entry_id:    row.get(0)?,
      seq:         row.get(1)?,
      batch_id:    row.get(2)?,
      table_name:  row.get(3)?,
      record_id:   row.get(4)?,
      field:       row.get(5)?,
      change_kind: row.get(6)?,
      old_value:   row.get(7)?,
      new_value:   row.get(8)?,
      recorded_at: row.get(9)?,
    })
  }

  pub fn into_entry(self) -> Result<ChangeLogEntry> {
    Ok(ChangeLogEntry {
      entry_id:    self.entry_id,
      seq:         self.seq,
      batch_id:    decode_batch(&self.batch_id)?,
      table:       self.table_name,
      record_id:   decode_uuid(&self.record_id)?,
      field:       self.field,
      kind:        decode_change_kind(&self.change_kind)?,
      old_value:   decode_value(&self.old_value)?,
      new_value:   decode_value(&self.new_value)?,
      recorded_at: decode_dt(&self.recorded_at)?,
    })
  }
}

/// Raw strings read directly from a `deleted_records` row.
pub struct RawSnapshot {
  pub deleted_id:  i64,
  pub seq:         i64,
  pub batch_id:    String,
  pub table_name:  String,
  pub record_id:   String,
  pub row_json:    String,
  pub deleted_at:  String,
  pub restored_at: Option<String>,
}

pub const SNAPSHOT_COLUMNS: &str =
  "deleted_id, seq, batch_id, table_name, record_id, row_json, deleted_at, restored_at";

impl RawSnapshot {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      deleted_id:  row.get(0)?,
      seq:         row.get(1)?,
      batch_id:    row.get(2)?,
      table_name:  row.get(3)?,
      record_id:   row.get(4)?,
      row_json:    row.get(5)?,
      deleted_at:  row.get(6)?,
      restored_at: row.get(7)?,
    })
  }

  pub fn into_snapshot(self) -> Result<DeletedRecordSnapshot> {
    Ok(DeletedRecordSnapshot {
      deleted_id:  self.deleted_id,
      seq:         self.seq,
      batch_id:    decode_batch(&self.batch_id)?,
      table:       self.table_name,
      record_id:   decode_uuid(&self.record_id)?,
      row:         decode_row(&self.row_json)?,
      deleted_at:  decode_dt(&self.deleted_at)?,
      restored_at: decode_opt_dt(self.restored_at)?,
    })
  }
}

/// Raw strings read directly from a `batches` row.
pub struct RawBatch {
  pub batch_id:   String,
  pub kind:       String,
  pub label:      Option<String>,
  pub created_at: String,
  pub undone_at:  Option<String>,
  pub undone_by:  Option<String>,
  pub purged_at:  Option<String>,
}

pub const BATCH_COLUMNS: &str =
  "batch_id, kind, label, created_at, undone_at, undone_by, purged_at";

impl RawBatch {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      batch_id:   row.get(0)?,
      kind:       row.get(1)?,
      label:      row.get(2)?,
      created_at: row.get(3)?,
      undone_at:  row.get(4)?,
      undone_by:  row.get(5)?,
      purged_at:  row.get(6)?,
    })
  }

  pub fn into_batch(self) -> Result<Batch> {
    Ok(Batch {
      batch_id:   decode_batch(&self.batch_id)?,
      kind:       decode_batch_kind(&self.kind)?,
      label:      self.label,
      created_at: decode_dt(&self.created_at)?,
      undone_at:  decode_opt_dt(self.undone_at)?,
      undone_by:  self.undone_by.as_deref().map(decode_batch).transpose()?,
      purged_at:  decode_opt_dt(self.purged_at)?,
    })
  }
}
