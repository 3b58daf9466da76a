//! The audited repository: generic CRUD over any [`Record`] table.
//!
//! Every function takes the connection of a transaction the caller already
//! holds. A row write and its change-log or recycle-bin record go through the
//! same connection, so they commit or roll back together; nothing here opens
//! or commits a transaction itself.
//!
//! Table and column names are only ever taken from static [`TableSpec`]s and
//! are checked before being interpolated into SQL.

use chrono::Utc;
use marquee_core::{
  ValidationError,
  audit::{BatchId, BatchKind, ChangeKind, ChangeLogEntry, DeletedRecordSnapshot},
  record::{FieldValue, Fields, Record, TableSpec},
};
use rusqlite::{Connection, OptionalExtension as _, params, params_from_iter, types::Value};
use tracing::debug;
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{
    CHANGE_LOG_COLUMNS, RawChangeLogEntry, RawSnapshot, SNAPSHOT_COLUMNS, decode_uuid,
    encode_batch, encode_dt, encode_row, encode_uuid, encode_value, from_sql, to_sql,
  },
};

// ─── Batches and sequencing ──────────────────────────────────────────────────

/// Record a batch on its first write. Later writes find the row in place.
fn open_batch(conn: &Connection, batch: BatchId) -> Result<()> {
  conn.execute(
    "INSERT OR IGNORE INTO batches (batch_id, kind, created_at) VALUES (?1, ?2, ?3)",
    params![encode_batch(batch), BatchKind::Action.to_string(), encode_dt(Utc::now())],
  )?;
  Ok(())
}

/// Describe a batch that already has writes. A batch that wrote nothing has
/// no row and stays that way.
pub fn label_batch(conn: &Connection, batch: BatchId, label: &str) -> Result<()> {
  conn.execute(
    "UPDATE batches SET label = ?1 WHERE batch_id = ?2 AND label IS NULL",
    params![label, encode_batch(batch)],
  )?;
  Ok(())
}

/// Turn a batch opened by undo steps into an undo batch. A batch that wrote
/// nothing has no row and stays that way.
pub fn mark_undo_batch(conn: &Connection, batch: BatchId, label: &str) -> Result<()> {
  conn.execute(
    "UPDATE batches SET kind = ?1, label = ?2 WHERE batch_id = ?3",
    params![BatchKind::Undo.to_string(), label, encode_batch(batch)],
  )?;
  Ok(())
}

/// Point the snapshot of a merged identity at the identity that absorbed it.
pub fn set_redirect(conn: &Connection, deleted_id: i64, target: Uuid) -> Result<()> {
  conn.execute(
    "UPDATE deleted_records SET redirect_to = ?1 WHERE deleted_id = ?2",
    params![encode_uuid(target), deleted_id],
  )?;
  Ok(())
}

fn next_seq(conn: &Connection) -> Result<i64> {
  Ok(conn.query_row(
    "UPDATE audit_sequence SET value = value + 1 WHERE id = 1 RETURNING value",
    [],
    |r| r.get(0),
  )?)
}

/// One repository call's audit context.
struct Step<'a> {
  seq:   i64,
  batch: BatchId,
  spec:  &'a TableSpec,
  id:    Uuid,
}

impl<'a> Step<'a> {
  fn begin(conn: &Connection, batch: BatchId, spec: &'a TableSpec, id: Uuid) -> Result<Self> {
    open_batch(conn, batch)?;
    Ok(Self { seq: next_seq(conn)?, batch, spec, id })
  }

  fn log(
    &self,
    conn: &Connection,
    field: &str,
    kind: ChangeKind,
    old: &FieldValue,
    new: &FieldValue,
  ) -> Result<()> {
    conn.execute(
      "INSERT INTO change_log (
         seq, batch_id, table_name, record_id, field,
         change_kind, old_value, new_value, recorded_at
       ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
      params![
        self.seq,
        encode_batch(self.batch),
        self.spec.name,
        encode_uuid(self.id),
        field,
        kind.to_string(),
        encode_value(old)?,
        encode_value(new)?,
        encode_dt(Utc::now()),
      ],
    )?;
    Ok(())
  }
}

// ─── Untyped row access ──────────────────────────────────────────────────────

fn check_column(spec: &TableSpec, field: &str) -> Result<()> {
  if spec.has_column(field) {
    Ok(())
  } else {
    Err(
      ValidationError::UnknownField {
        table: spec.name.to_owned(),
        field: field.to_owned(),
      }
      .into(),
    )
  }
}

fn select_sql(spec: &TableSpec) -> String {
  format!("SELECT {} FROM {}", spec.columns.join(", "), spec.name)
}

fn row_values(spec: &TableSpec, row: &rusqlite::Row<'_>) -> rusqlite::Result<Vec<Value>> {
  (0..spec.columns.len()).map(|i| row.get(i)).collect()
}

fn into_fields(spec: &TableSpec, values: Vec<Value>) -> Result<Fields> {
  spec
    .columns
    .iter()
    .zip(values)
    .map(|(column, value)| -> Result<(String, FieldValue)> {
      Ok(((*column).to_owned(), from_sql(value)?))
    })
    .collect()
}

pub fn fetch_row(conn: &Connection, spec: &TableSpec, id: Uuid) -> Result<Option<Fields>> {
  let sql = format!("{} WHERE {} = ?1", select_sql(spec), spec.key);
  let values = conn
    .query_row(&sql, params![encode_uuid(id)], |row| row_values(spec, row))
    .optional()?;
  values.map(|v| into_fields(spec, v)).transpose()
}

/// All rows whose `column` equals `value`, oldest first.
pub fn select_rows(
  conn: &Connection,
  spec: &TableSpec,
  column: &str,
  value: &FieldValue,
) -> Result<Vec<Fields>> {
  check_column(spec, column)?;
  let sql = format!(
    "{} WHERE {column} = ?1 ORDER BY created_at, {}",
    select_sql(spec),
    spec.key
  );
  let mut stmt = conn.prepare(&sql)?;
  let rows = stmt
    .query_map(params![to_sql(value)], |row| row_values(spec, row))?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  rows.into_iter().map(|v| into_fields(spec, v)).collect()
}

/// Every row of the table ordered by primary key.
pub fn all_rows(conn: &Connection, spec: &TableSpec) -> Result<Vec<Fields>> {
  let sql = format!("{} ORDER BY {}", select_sql(spec), spec.key);
  let mut stmt = conn.prepare(&sql)?;
  let rows = stmt
    .query_map([], |row| row_values(spec, row))?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  rows.into_iter().map(|v| into_fields(spec, v)).collect()
}

// ─── Audited writes ──────────────────────────────────────────────────────────

/// Insert a row and log one entry per non-default field.
pub fn insert_row(conn: &Connection, spec: &TableSpec, row: &Fields, batch: BatchId) -> Result<Uuid> {
  for (field, _) in row.iter() {
    check_column(spec, field)?;
  }
  let id = match row.get(spec.key) {
    Some(FieldValue::Text(key)) => decode_uuid(key)?,
    _ => return Err(Error::Decode(format!("{} row without {}", spec.name, spec.key))),
  };

  let columns: Vec<&str> = row.iter().map(|(c, _)| c).collect();
  let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
  let sql = format!(
    "INSERT INTO {} ({}) VALUES ({})",
    spec.name,
    columns.join(", "),
    placeholders.join(", ")
  );
  conn.execute(&sql, params_from_iter(row.iter().map(|(_, v)| to_sql(v))))?;

  let step = Step::begin(conn, batch, spec, id)?;
  for (field, value) in row.iter().filter(|(_, v)| !v.is_default()) {
    step.log(conn, field, ChangeKind::Insert, &FieldValue::Null, value)?;
  }

  debug!(table = spec.name, %id, %batch, seq = step.seq, "inserted");
  Ok(id)
}

/// Apply `changes` to a row and log one entry per field whose value actually
/// changed. Returns the number of changed fields; a call that changes nothing
/// writes nothing.
pub fn update_row(
  conn: &Connection,
  spec: &TableSpec,
  id: Uuid,
  changes: &Fields,
  batch: BatchId,
) -> Result<usize> {
  for (field, _) in changes.iter() {
    if field == spec.key {
      return Err(
        ValidationError::UnknownField {
          table: spec.name.to_owned(),
          field: field.to_owned(),
        }
        .into(),
      );
    }
    check_column(spec, field)?;
  }

  let current = fetch_row(conn, spec, id)?.ok_or_else(|| Error::not_found(spec.name, id))?;
  let diff = current.diff(changes);
  if diff.is_empty() {
    return Ok(0);
  }

  let assignments: Vec<String> = diff
    .iter()
    .enumerate()
    .map(|(i, c)| format!("{} = ?{}", c.field, i + 1))
    .collect();
  let sql = format!(
    "UPDATE {} SET {} WHERE {} = ?{}",
    spec.name,
    assignments.join(", "),
    spec.key,
    diff.len() + 1
  );
  let mut values: Vec<Value> = diff.iter().map(|c| to_sql(&c.new)).collect();
  values.push(Value::Text(encode_uuid(id)));

  let affected = conn.execute(&sql, params_from_iter(values))?;
  if affected != 1 {
    return Err(Error::not_found(spec.name, id));
  }

  let step = Step::begin(conn, batch, spec, id)?;
  for change in &diff {
    step.log(conn, &change.field, ChangeKind::Update, &change.old, &change.new)?;
  }

  debug!(table = spec.name, %id, %batch, seq = step.seq, fields = diff.len(), "updated");
  Ok(diff.len())
}

/// Snapshot a row into the recycle bin, then delete it. Returns the
/// snapshot's id.
pub fn delete_row(conn: &Connection, spec: &TableSpec, id: Uuid, batch: BatchId) -> Result<i64> {
  let row = fetch_row(conn, spec, id)?.ok_or_else(|| Error::not_found(spec.name, id))?;

  let step = Step::begin(conn, batch, spec, id)?;
  conn.execute(
    "INSERT INTO deleted_records (seq, batch_id, table_name, record_id, row_json, deleted_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    params![
      step.seq,
      encode_batch(batch),
      spec.name,
      encode_uuid(id),
      encode_row(&row)?,
      encode_dt(Utc::now()),
    ],
  )?;
  let deleted_id = conn.last_insert_rowid();

  let sql = format!("DELETE FROM {} WHERE {} = ?1", spec.name, spec.key);
  let affected = conn.execute(&sql, params![encode_uuid(id)])?;
  if affected != 1 {
    return Err(Error::not_found(spec.name, id));
  }

  debug!(table = spec.name, %id, %batch, seq = step.seq, deleted_id, "soft-deleted");
  Ok(deleted_id)
}

/// Re-insert a snapshot's row verbatim (logged as an insert under `batch`)
/// and stamp the snapshot as restored.
pub fn restore_row(conn: &Connection, deleted_id: i64, batch: BatchId) -> Result<Uuid> {
  let snapshot =
    load_snapshot(conn, deleted_id)?.ok_or_else(|| Error::not_found("deleted_records", deleted_id))?;
  if snapshot.restored_at.is_some() {
    return Err(Error::AlreadyRestored(deleted_id));
  }
  let spec = TableSpec::by_name(&snapshot.table)
    .ok_or_else(|| Error::Decode(format!("unknown audited table {:?}", snapshot.table)))?;

  let id = insert_row(conn, spec, &snapshot.row, batch)?;
  conn.execute(
    "UPDATE deleted_records SET restored_at = ?1 WHERE deleted_id = ?2",
    params![encode_dt(Utc::now()), deleted_id],
  )?;

  debug!(table = spec.name, %id, %batch, deleted_id, "restored");
  Ok(id)
}

// ─── Typed access ────────────────────────────────────────────────────────────

pub fn get<R: Record>(conn: &Connection, id: Uuid) -> Result<Option<R>> {
  fetch_row(conn, &R::SPEC, id)?
    .map(|f| R::from_fields(&f).map_err(Error::from))
    .transpose()
}

pub fn require<R: Record>(conn: &Connection, id: Uuid) -> Result<R> {
  get(conn, id)?.ok_or_else(|| Error::not_found(R::SPEC.name, id))
}

pub fn find<R: Record>(conn: &Connection, column: &str, value: impl Into<FieldValue>) -> Result<Vec<R>> {
  select_rows(conn, &R::SPEC, column, &value.into())?
    .iter()
    .map(|f| R::from_fields(f).map_err(Error::from))
    .collect()
}

pub fn all<R: Record>(conn: &Connection) -> Result<Vec<R>> {
  all_rows(conn, &R::SPEC)?
    .iter()
    .map(|f| R::from_fields(f).map_err(Error::from))
    .collect()
}

pub fn insert<R: Record>(conn: &Connection, entity: &R, batch: BatchId) -> Result<Uuid> {
  insert_row(conn, &R::SPEC, &entity.to_fields(), batch)
}

pub fn update<R: Record>(conn: &Connection, id: Uuid, changes: &Fields, batch: BatchId) -> Result<usize> {
  update_row(conn, &R::SPEC, id, changes, batch)
}

pub fn delete<R: Record>(conn: &Connection, id: Uuid, batch: BatchId) -> Result<i64> {
  delete_row(conn, &R::SPEC, id, batch)
}

// ─── Audit reads ─────────────────────────────────────────────────────────────

pub fn load_snapshot(conn: &Connection, deleted_id: i64) -> Result<Option<DeletedRecordSnapshot>> {
  let sql = format!("SELECT {SNAPSHOT_COLUMNS} FROM deleted_records WHERE deleted_id = ?1");
  conn
    .query_row(&sql, params![deleted_id], RawSnapshot::from_row)
    .optional()?
    .map(RawSnapshot::into_snapshot)
    .transpose()
}

pub fn snapshots_for_batch(conn: &Connection, batch: BatchId) -> Result<Vec<DeletedRecordSnapshot>> {
  let sql = format!(
    "SELECT {SNAPSHOT_COLUMNS} FROM deleted_records WHERE batch_id = ?1 ORDER BY seq"
  );
  let mut stmt = conn.prepare(&sql)?;
  let raws = stmt
    .query_map(params![encode_batch(batch)], RawSnapshot::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raws.into_iter().map(RawSnapshot::into_snapshot).collect()
}

pub fn change_log_for_batch(conn: &Connection, batch: BatchId) -> Result<Vec<ChangeLogEntry>> {
  let sql = format!(
    "SELECT {CHANGE_LOG_COLUMNS} FROM change_log WHERE batch_id = ?1 ORDER BY seq, entry_id"
  );
  let mut stmt = conn.prepare(&sql)?;
  let raws = stmt
    .query_map(params![encode_batch(batch)], RawChangeLogEntry::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raws.into_iter().map(RawChangeLogEntry::into_entry).collect()
}
