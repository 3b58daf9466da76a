//! The `CatalogStore` trait.
//!
//! Implemented by storage backends (e.g. `marquee-store-sqlite`). Every
//! mutating method takes the [`BatchId`] of the user action it belongs to and
//! runs as a single transaction: it either commits together with its audit
//! records or leaves nothing behind.

use std::future::Future;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
  audit::{Batch, BatchId, ChangeLogEntry, DeletedRecordSnapshot, UndoReport},
  error::{Classify, UndoError, ValidationError},
  identity::{
    Alias, Credit, GraphSnapshot, Identity, IdentityKind, Membership, MergeOutcome,
    UnlinkOutcome,
  },
};

/// Abstraction over a catalog backend.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes.
pub trait CatalogStore: Send + Sync {
  type Error: std::error::Error
    + Classify
    + From<ValidationError>
    + From<UndoError>
    + Send
    + Sync
    + 'static;

  /// Allocate a correlation id for one logical user action.
  fn begin_batch(&self) -> BatchId { BatchId::new() }

  // ── Identities ────────────────────────────────────────────────────────

  /// Create an identity that owns its display name as its first alias.
  fn create_identity(
    &self,
    kind: IdentityKind,
    name: String,
    batch: BatchId,
  ) -> impl Future<Output = Result<Identity, Self::Error>> + Send + '_;

  fn get_identity(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Identity>, Self::Error>> + Send + '_;

  fn list_identities(
    &self,
    kind: Option<IdentityKind>,
  ) -> impl Future<Output = Result<Vec<Identity>, Self::Error>> + Send + '_;

  /// Soft-delete an identity along with its aliases, memberships and
  /// credits.
  fn delete_identity(
    &self,
    id: Uuid,
    batch: BatchId,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Identities that own no alias, typically left behind by an unlink.
  fn list_orphans(
    &self,
  ) -> impl Future<Output = Result<Vec<Identity>, Self::Error>> + Send + '_;

  // ── Aliases ───────────────────────────────────────────────────────────

  /// Bind a new name to an identity. Returns the existing alias when the
  /// identity already owns the name.
  fn add_alias(
    &self,
    identity_id: Uuid,
    name: String,
    batch: BatchId,
  ) -> impl Future<Output = Result<Alias, Self::Error>> + Send + '_;

  fn aliases_of(
    &self,
    identity_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Alias>, Self::Error>> + Send + '_;

  // ── Memberships ───────────────────────────────────────────────────────

  /// Record that `member_id` belongs to `group_id`. Rejects cycles.
  fn add_membership(
    &self,
    member_id: Uuid,
    group_id: Uuid,
    batch: BatchId,
  ) -> impl Future<Output = Result<Membership, Self::Error>> + Send + '_;

  fn remove_membership(
    &self,
    member_id: Uuid,
    group_id: Uuid,
    batch: BatchId,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Memberships in which the identity is either the member or the group.
  fn memberships_of(
    &self,
    identity_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Membership>, Self::Error>> + Send + '_;

  // ── Credits ───────────────────────────────────────────────────────────

  fn add_credit(
    &self,
    source_id: Uuid,
    identity_id: Uuid,
    role_id: String,
    batch: BatchId,
  ) -> impl Future<Output = Result<Credit, Self::Error>> + Send + '_;

  fn credits_of(
    &self,
    identity_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Credit>, Self::Error>> + Send + '_;

  // ── Resolution ────────────────────────────────────────────────────────

  /// Move everything `source_id` owns onto `target_id` and soft-delete the
  /// source.
  fn merge(
    &self,
    source_id: Uuid,
    target_id: Uuid,
    batch: BatchId,
  ) -> impl Future<Output = Result<MergeOutcome, Self::Error>> + Send + '_;

  /// Run several merges as one batch. Cancelling `cancel` before the batch
  /// commits rolls all of them back.
  fn bulk_merge(
    &self,
    pairs: Vec<(Uuid, Uuid)>,
    batch: BatchId,
    cancel: CancellationToken,
  ) -> impl Future<Output = Result<Vec<MergeOutcome>, Self::Error>> + Send + '_;

  /// Detach an alias into a new standalone identity of `kind`, inheriting
  /// the current owner's kind when `None`.
  fn unlink_alias(
    &self,
    alias_id: Uuid,
    kind: Option<IdentityKind>,
    batch: BatchId,
  ) -> impl Future<Output = Result<UnlinkOutcome, Self::Error>> + Send + '_;

  /// The identity currently owning an alias with this name.
  fn resolve(
    &self,
    name: String,
  ) -> impl Future<Output = Result<Option<Uuid>, Self::Error>> + Send + '_;

  /// `id` itself when live, otherwise the live identity it was merged into.
  fn resolve_id(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Uuid>, Self::Error>> + Send + '_;

  fn graph_snapshot(
    &self,
  ) -> impl Future<Output = Result<GraphSnapshot, Self::Error>> + Send + '_;

  // ── Batches and undo ──────────────────────────────────────────────────

  /// Reverse every change recorded under `batch`, recording the reversal
  /// under a new batch. A reversal that stops part-way commits the steps
  /// already applied and fails with [`UndoError::Partial`].
  fn undo(
    &self,
    batch: BatchId,
  ) -> impl Future<Output = Result<UndoReport, Self::Error>> + Send + '_;

  /// `None` when the batch never wrote anything.
  fn get_batch(
    &self,
    batch: BatchId,
  ) -> impl Future<Output = Result<Option<Batch>, Self::Error>> + Send + '_;

  /// The most recent user action that can still be undone.
  fn last_undoable_batch(
    &self,
  ) -> impl Future<Output = Result<Option<BatchId>, Self::Error>> + Send + '_;

  fn list_batches(
    &self,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<Batch>, Self::Error>> + Send + '_;

  fn change_log(
    &self,
    batch: BatchId,
  ) -> impl Future<Output = Result<Vec<ChangeLogEntry>, Self::Error>> + Send + '_;

  // ── Recycle bin ───────────────────────────────────────────────────────

  fn list_deleted(
    &self,
    include_restored: bool,
  ) -> impl Future<Output = Result<Vec<DeletedRecordSnapshot>, Self::Error>> + Send + '_;

  /// Re-insert a deleted row verbatim.
  fn restore(
    &self,
    deleted_id: i64,
    batch: BatchId,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Physically remove snapshots taken at or before `older_than` (all of
  /// them when `None`). Returns the number removed.
  fn purge_deleted(
    &self,
    older_than: Option<DateTime<Utc>>,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;
}
