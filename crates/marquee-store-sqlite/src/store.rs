//! [`SqliteStore`] is the SQLite implementation of [`CatalogStore`].

use std::{path::Path, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use marquee_core::{
  UndoError,
  audit::{Batch, BatchId, ChangeLogEntry, DeletedRecordSnapshot, UndoReport},
  config::CatalogConfig,
  identity::{
    Alias, Credit, GraphSnapshot, Identity, IdentityKind, Membership, MergeOutcome,
    UnlinkOutcome,
  },
  store::CatalogStore,
};
use rusqlite::{Connection, Transaction};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
  Error, Result,
  engine::Engine,
  graph, repository,
  schema::{READER_PRAGMAS, SCHEMA},
  undo,
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Marquee catalog backed by a single SQLite database.
///
/// All writes are serialised on one connection. A file-backed store reads
/// through a second, read-only connection so lookups never queue behind a
/// long write. Cloning is cheap; the connections are reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  writer: tokio_rusqlite::Connection,
  reader: tokio_rusqlite::Connection,
  config: Arc<CatalogConfig>,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>, config: CatalogConfig) -> Result<Self> {
    config.validate()?;
    let path = path.as_ref().to_owned();

    let writer = tokio_rusqlite::Connection::open(&path).await?;
    init(&writer, SCHEMA).await?;
    let reader = tokio_rusqlite::Connection::open(&path).await?;
    init(&reader, READER_PRAGMAS).await?;

    info!(path = %path.display(), "opened catalog store");
    Ok(Self { writer, reader, config: Arc::new(config) })
  }

  /// Open an in-memory store for tests. Reads share the writer
  /// connection, since a second connection would see a different database.
  pub async fn open_in_memory(config: CatalogConfig) -> Result<Self> {
    config.validate()?;
    let writer = tokio_rusqlite::Connection::open_in_memory().await?;
    init(&writer, SCHEMA).await?;
    Ok(Self { reader: writer.clone(), writer, config: Arc::new(config) })
  }

  pub fn config(&self) -> &CatalogConfig { &self.config }

  /// Run `f` in one write transaction, committing only if it succeeds.
  async fn write<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&mut Transaction<'_>, &CatalogConfig) -> Result<T> + Send + 'static,
  {
    let config = Arc::clone(&self.config);
    self
      .writer
      .call(move |conn| {
        let mut tx = conn.transaction()?;
        match f(&mut tx, &config) {
          Ok(value) => {
            tx.commit()?;
            Ok(Ok(value))
          }
          // Dropping `tx` rolls it back.
          Err(e) => Ok(Err(e)),
        }
      })
      .await?
  }

  /// Run one engine operation under `batch`.
  async fn run<T, F>(&self, batch: BatchId, label: &'static str, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&Engine<'_>) -> Result<T> + Send + 'static,
  {
    let value = self
      .write(move |tx, config| {
        let engine = Engine::new(tx, config, batch);
        let value = f(&engine)?;
        engine.label(label)?;
        Ok(value)
      })
      .await?;
    info!(%batch, action = label, "committed");
    Ok(value)
  }

  async fn read<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&Connection) -> Result<T> + Send + 'static,
  {
    self.reader.call(move |conn| Ok(f(conn))).await?
  }
}

async fn init(conn: &tokio_rusqlite::Connection, pragmas: &'static str) -> Result<()> {
  conn
    .call(move |conn| {
      conn.busy_timeout(BUSY_TIMEOUT)?;
      conn.execute_batch(pragmas)?;
      Ok(())
    })
    .await?;
  Ok(())
}

// ─── CatalogStore impl ───────────────────────────────────────────────────────

impl CatalogStore for SqliteStore {
  type Error = Error;

  // ── Identities ──────────────────────────────────────────────────────────

  async fn create_identity(
    &self,
    kind: IdentityKind,
    name: String,
    batch: BatchId,
  ) -> Result<Identity> {
    self
      .run(batch, "create identity", move |e| e.create_identity(kind, &name))
      .await
  }

  async fn get_identity(&self, id: Uuid) -> Result<Option<Identity>> {
    self.read(move |conn| repository::get(conn, id)).await
  }

  async fn list_identities(&self, kind: Option<IdentityKind>) -> Result<Vec<Identity>> {
    self
      .read(move |conn| match kind {
        Some(kind) => repository::find(conn, "kind", kind),
        None => repository::all(conn),
      })
      .await
  }

  async fn delete_identity(&self, id: Uuid, batch: BatchId) -> Result<()> {
    self
      .run(batch, "delete identity", move |e| e.delete_identity(id))
      .await
  }

  async fn list_orphans(&self) -> Result<Vec<Identity>> { self.read(graph::orphans).await }

  // ── Aliases ─────────────────────────────────────────────────────────────

  async fn add_alias(&self, identity_id: Uuid, name: String, batch: BatchId) -> Result<Alias> {
    self
      .run(batch, "add alias", move |e| e.add_alias(identity_id, &name))
      .await
  }

  async fn aliases_of(&self, identity_id: Uuid) -> Result<Vec<Alias>> {
    self
      .read(move |conn| graph::aliases_of(conn, identity_id))
      .await
  }

  // ── Memberships ─────────────────────────────────────────────────────────

  async fn add_membership(
    &self,
    member_id: Uuid,
    group_id: Uuid,
    batch: BatchId,
  ) -> Result<Membership> {
    self
      .run(batch, "add membership", move |e| {
        e.add_membership(member_id, group_id)
      })
      .await
  }

  async fn remove_membership(&self, member_id: Uuid, group_id: Uuid, batch: BatchId) -> Result<()> {
    self
      .run(batch, "remove membership", move |e| {
        e.remove_membership(member_id, group_id)
      })
      .await
  }

  async fn memberships_of(&self, identity_id: Uuid) -> Result<Vec<Membership>> {
    self
      .read(move |conn| {
        let mut all = graph::memberships_as_member(conn, identity_id)?;
        all.extend(graph::memberships_as_group(conn, identity_id)?);
        Ok(all)
      })
      .await
  }

  // ── Credits ─────────────────────────────────────────────────────────────

  async fn add_credit(
    &self,
    source_id: Uuid,
    identity_id: Uuid,
    role_id: String,
    batch: BatchId,
  ) -> Result<Credit> {
    self
      .run(batch, "add credit", move |e| {
        e.add_credit(source_id, identity_id, &role_id)
      })
      .await
  }

  async fn credits_of(&self, identity_id: Uuid) -> Result<Vec<Credit>> {
    self
      .read(move |conn| graph::credits_of(conn, identity_id))
      .await
  }

  // ── Resolution ──────────────────────────────────────────────────────────

  async fn merge(&self, source_id: Uuid, target_id: Uuid, batch: BatchId) -> Result<MergeOutcome> {
    self
      .run(batch, "merge", move |e| e.merge(source_id, target_id))
      .await
  }

  async fn bulk_merge(
    &self,
    pairs: Vec<(Uuid, Uuid)>,
    batch: BatchId,
    cancel: CancellationToken,
  ) -> Result<Vec<MergeOutcome>> {
    let count = pairs.len();
    let result = self
      .run(batch, "bulk merge", move |e| {
        let mut outcomes = Vec::with_capacity(pairs.len());
        for (source, target) in pairs {
          if cancel.is_cancelled() {
            return Err(Error::Cancelled);
          }
          outcomes.push(e.merge(source, target)?);
        }
        if cancel.is_cancelled() {
          return Err(Error::Cancelled);
        }
        Ok(outcomes)
      })
      .await;
    if let Err(Error::Cancelled) = &result {
      warn!(%batch, merges = count, "bulk merge cancelled; rolled back");
    }
    result
  }

  async fn unlink_alias(
    &self,
    alias_id: Uuid,
    kind: Option<IdentityKind>,
    batch: BatchId,
  ) -> Result<UnlinkOutcome> {
    self
      .run(batch, "unlink alias", move |e| e.unlink_alias(alias_id, kind))
      .await
  }

  async fn resolve(&self, name: String) -> Result<Option<Uuid>> {
    self.read(move |conn| graph::resolve(conn, &name)).await
  }

  async fn resolve_id(&self, id: Uuid) -> Result<Option<Uuid>> {
    self.read(move |conn| graph::resolve_id(conn, id)).await
  }

  async fn graph_snapshot(&self) -> Result<GraphSnapshot> { self.read(graph::snapshot).await }

  // ── Batches and undo ────────────────────────────────────────────────────

  async fn undo(&self, batch: BatchId) -> Result<UndoReport> {
    let undo_id = self.begin_batch();
    let report = self
      .write(move |tx, _| undo::undo_batch(tx, batch, undo_id))
      .await?;

    if report.is_complete() {
      info!(%batch, undo_batch = %undo_id, steps = report.steps.len(), "batch undone");
      Ok(report)
    } else {
      warn!(%batch, undo_batch = %undo_id, summary = %report.summary(), "partial undo");
      Err(UndoError::Partial(report).into())
    }
  }

  async fn get_batch(&self, batch: BatchId) -> Result<Option<Batch>> {
    self.read(move |conn| undo::get_batch(conn, batch)).await
  }

  async fn last_undoable_batch(&self) -> Result<Option<BatchId>> {
    self.read(undo::last_undoable).await
  }

  async fn list_batches(&self, limit: usize) -> Result<Vec<Batch>> {
    self
      .read(move |conn| undo::list_batches(conn, limit))
      .await
  }

  async fn change_log(&self, batch: BatchId) -> Result<Vec<ChangeLogEntry>> {
    self
      .read(move |conn| repository::change_log_for_batch(conn, batch))
      .await
  }

  // ── Recycle bin ─────────────────────────────────────────────────────────

  async fn list_deleted(&self, include_restored: bool) -> Result<Vec<DeletedRecordSnapshot>> {
    self
      .read(move |conn| undo::list_deleted(conn, include_restored))
      .await
  }

  async fn restore(&self, deleted_id: i64, batch: BatchId) -> Result<()> {
    self
      .write(move |tx, _| {
        repository::restore_row(tx, deleted_id, batch)?;
        repository::label_batch(tx, batch, "restore")
      })
      .await?;
    info!(%batch, deleted_id, "restored deleted record");
    Ok(())
  }

  async fn purge_deleted(&self, older_than: Option<DateTime<Utc>>) -> Result<usize> {
    let removed = self
      .write(move |tx, _| undo::purge(tx, older_than))
      .await?;
    info!(removed, "purged recycle bin");
    Ok(removed)
  }
}
